//! Wire strings and input framing for the line-oriented chat protocol.

use std::borrow::Cow;
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Name prompt, written without a trailing newline
pub const PROMPT: &str = "Enter your username: ";

/// Name used when the client sends an empty line during negotiation
pub const DEFAULT_NAME: &str = "Anonymous";

/// Sent to a connection refused because the registry is full
pub const SERVER_FULL: &str = "Server is full. Try again later\n";

pub const EXIT_COMMAND: &str = "/exit";
pub const RENAME_COMMAND: &str = "/rename";

/// Welcome banner sent before the name prompt
pub const BANNER: &str = concat!(
    "\x1b[31m",
    "Welcome to TCP-Chat!\n",
    "         _nnnn_\n",
    "        dGGGGMMb\n",
    "       @p~qp~~qMb\n",
    "       M|@||@) M|\n",
    "       @,----.JM|\n",
    "      JS^\\__/  qKL\n",
    "     dZP        qKRb\n",
    "    dZP          qKKb\n",
    "   fZP            SMMb\n",
    "   HZM            MMMM\n",
    "   FqM            MMMM\n",
    " __| \".        |\\dS\"qML\n",
    " |    '.       | '' \\Zq\n",
    "_)      \\.___.,|     .'\n",
    "\\____   )MMMMMP|   .'\n",
    "     '-'       '--'\n",
    "\x1b[0m",
);

/// One framed unit of client input, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Exit,
    Rename,
    Blank,
    /// Chat text, still carrying its line terminator if it had one
    Message(String),
}

impl Input {
    pub fn parse(raw: &str) -> Input {
        match strip_line_ending(raw) {
            EXIT_COMMAND => Input::Exit,
            RENAME_COMMAND => Input::Rename,
            "" => Input::Blank,
            _ => Input::Message(raw.to_string()),
        }
    }
}

/// Drops one trailing `\n` or `\r\n`.
pub fn strip_line_ending(s: &str) -> &str {
    let s = s.strip_suffix('\n').unwrap_or(s);
    s.strip_suffix('\r').unwrap_or(s)
}

/// Ensures the string ends with exactly one newline (`\n`).
/// Borrows when nothing needs adding.
pub fn ensure_trailing_newline(s: &str) -> Cow<'_, str> {
    if s.ends_with('\n') {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{s}\n"))
    }
}

/// Display name chosen from a negotiation line
pub fn display_name(raw: &str) -> String {
    match strip_line_ending(raw) {
        "" => DEFAULT_NAME.to_string(),
        name => name.to_string(),
    }
}

/// Reads the next line, at most `max_len` bytes.
///
/// Returns `Ok(None)` at end of stream. A longer line comes back in
/// `max_len`-sized pieces without a terminator; a final fragment with no
/// newline is returned as is. Invalid UTF-8 is replaced, not rejected.
///
/// A piece never ends inside a multibyte character: when the limit falls in
/// the middle of one, its remaining bytes (at most three) are read too.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader
        .take(max_len.max(1) as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if let Some(missing) = unfinished_char(&buf) {
            reader
                .take(missing as u64)
                .read_until(b'\n', &mut buf)
                .await?;
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Bytes still needed to complete a UTF-8 sequence cut off at the end of `buf`
fn unfinished_char(buf: &[u8]) -> Option<usize> {
    let from = buf.len().saturating_sub(4);
    let lead = (from..buf.len()).rev().find(|&i| buf[i] & 0xC0 != 0x80)?;
    let width = match buf[lead] {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return None,
    };
    let have = buf.len() - lead;
    (width > have).then(|| width - have)
}

// === Formatted lines ===

pub fn chat_line(ts: &str, name: &str, text: &str) -> String {
    format!("[{}] {}: {}", ts, name, ensure_trailing_newline(text))
}

pub fn joined_notice(ts: &str, name: &str) -> String {
    format!("[{}] {} joined the chat\n", ts, name)
}

pub fn left_notice(ts: &str, name: &str) -> String {
    format!("[{}] {} left the chat\n", ts, name)
}

pub fn renamed_notice(ts: &str, old: &str, new: &str) -> String {
    format!("[{}] {} changed his name to {}\n", ts, old, new)
}

pub fn disconnected_notice(ts: &str, name: &str) -> String {
    format!("[{}] {} has been disconnected\n", ts, name)
}

pub fn connected_line(ts: &str, addr: &std::net::SocketAddr, name: &str) -> String {
    format!("[{}] New user connected : {}. Username : {}\n", ts, addr, name)
}

pub fn started_line(ts: &str, host: &str, port: u16) -> String {
    format!("[{}] Server started on {}:{}\n", ts, host, port)
}

pub fn stopped_line(ts: &str) -> String {
    format!("[{}] Server stopped\n", ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn commands_match_whole_lines_only() {
        assert_eq!(Input::parse("/exit\n"), Input::Exit);
        assert_eq!(Input::parse("/exit\r\n"), Input::Exit);
        assert_eq!(Input::parse("/rename\n"), Input::Rename);
        assert_eq!(
            Input::parse("/exit now\n"),
            Input::Message("/exit now\n".to_string())
        );
        assert_eq!(
            Input::parse(" /rename\n"),
            Input::Message(" /rename\n".to_string())
        );
    }

    #[test]
    fn bare_newline_is_blank() {
        assert_eq!(Input::parse("\n"), Input::Blank);
        assert_eq!(Input::parse("\r\n"), Input::Blank);
        assert_eq!(Input::parse(" \n"), Input::Message(" \n".to_string()));
    }

    #[test]
    fn empty_name_becomes_anonymous() {
        assert_eq!(display_name("\n"), "Anonymous");
        assert_eq!(display_name("\r\n"), "Anonymous");
        assert_eq!(display_name("alice\r\n"), "alice");
        assert_eq!(display_name("bob"), "bob");
    }

    #[test]
    fn chat_line_always_ends_in_one_newline() {
        assert_eq!(chat_line("ts", "alice", "hello\n"), "[ts] alice: hello\n");
        assert_eq!(chat_line("ts", "alice", "hello"), "[ts] alice: hello\n");
    }

    #[test]
    fn notices_use_wire_wording() {
        assert_eq!(joined_notice("ts", "bob"), "[ts] bob joined the chat\n");
        assert_eq!(left_notice("ts", "bob"), "[ts] bob left the chat\n");
        assert_eq!(
            renamed_notice("ts", "bob", "robert"),
            "[ts] bob changed his name to robert\n"
        );
        assert_eq!(
            disconnected_notice("ts", "bob"),
            "[ts] bob has been disconnected\n"
        );
        assert_eq!(
            started_line("ts", "localhost", 8080),
            "[ts] Server started on localhost:8080\n"
        );
    }

    #[tokio::test]
    async fn frames_follow_newlines_not_reads() {
        let data: &[u8] = b"hel";
        let mut reader = BufReader::new(data.chain(&b"lo\nsecond\nthird"[..]));

        assert_eq!(read_frame(&mut reader, 1024).await.unwrap().as_deref(), Some("hello\n"));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap().as_deref(), Some("second\n"));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap().as_deref(), Some("third"));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn long_lines_are_split_at_the_limit() {
        let data: &[u8] = b"abcdefgh\n";
        let mut reader = BufReader::new(data);

        assert_eq!(read_frame(&mut reader, 4).await.unwrap().as_deref(), Some("abcd"));
        assert_eq!(read_frame(&mut reader, 4).await.unwrap().as_deref(), Some("efgh"));
        assert_eq!(read_frame(&mut reader, 4).await.unwrap().as_deref(), Some("\n"));
        assert_eq!(read_frame(&mut reader, 4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn characters_straddling_the_limit_stay_whole() {
        let data = "abcé\n".as_bytes();
        let mut reader = BufReader::new(data);
        assert_eq!(read_frame(&mut reader, 4).await.unwrap().as_deref(), Some("abcé"));
        assert_eq!(read_frame(&mut reader, 4).await.unwrap().as_deref(), Some("\n"));
        assert_eq!(read_frame(&mut reader, 4).await.unwrap(), None);

        let text = "ab🦀cd🦀\n";
        let mut reader = BufReader::new(text.as_bytes());
        let mut rebuilt = String::new();
        while let Some(frame) = read_frame(&mut reader, 3).await.unwrap() {
            assert!(!frame.contains('\u{fffd}'), "split character in {:?}", frame);
            rebuilt.push_str(&frame);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn unfinished_char_counts_missing_bytes() {
        assert_eq!(unfinished_char(b"abc"), None);
        assert_eq!(unfinished_char("abcé".as_bytes()), None);
        assert_eq!(unfinished_char(&"é".as_bytes()[..1]), Some(1));
        assert_eq!(unfinished_char(&"🦀".as_bytes()[..2]), Some(2));
        assert_eq!(unfinished_char(b"ab\xff"), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let data: &[u8] = b"caf\xff\n";
        let mut reader = BufReader::new(data);
        let frame = read_frame(&mut reader, 64).await.unwrap().unwrap();
        assert_eq!(frame, "caf\u{fffd}\n");
    }
}
