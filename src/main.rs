use std::process::ExitCode;
use std::sync::Arc;

use tcp_chat::{ChatError, FileJournal, Journal, ServerConfig, init_logger, run_server};

fn main() -> ExitCode {
    // `[host] [port]`, on top of the optional TCP_CHAT_CONFIG file
    let config = match ServerConfig::load(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(ChatError::Usage | ChatError::InvalidPort(_)) => {
            println!("{}", ChatError::Usage);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let logger = init_logger("tcp_chat", &config.logger);

    // Build a multi-threaded Tokio runtime based on the `worker_threads` value.
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("tcp-chat-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            logger.error(&ChatError::Runtime(e).to_string());
            return ExitCode::FAILURE;
        }
    };

    let journal: Arc<dyn Journal> = Arc::new(FileJournal::new(config.log_dir.clone()));

    match rt.block_on(run_server(config, journal, logger.clone())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error(&format!("Chat server error: {}", e));
            ExitCode::FAILURE
        }
    }
}
