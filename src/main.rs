use std::{io, sync::Arc, thread};

use colored::Colorize;
use log::{error, info};
use meshcall_collab::Collab;
use meshcall_core::Config;
use meshcall_server::{run_server, ServerContext};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

mod logging;

pub struct Meshcall {
    config: Config,
    collab: Arc<Collab>,
    context: ServerContext,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum MeshcallError {
    #[error("Could not build the async runtime: {0}")]
    Runtime(io::Error),

    #[error("Server stopped: {0}")]
    Server(io::Error),
}

impl Meshcall {
    fn new() -> Result<Self, MeshcallError> {
        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("meshcall-async")
            .build()
            .map_err(MeshcallError::Runtime)?;

        let config = Config::from_env();
        let collab = Arc::new(Collab::new());
        let context = ServerContext::new(collab.clone());

        Ok(Self {
            config,
            collab,
            context,
            runtime,
        })
    }

    fn run(&self) -> Result<(), MeshcallError> {
        let collab = self.collab.clone();
        let sse = self.context.sse.clone();

        thread::spawn(move || {
            while let Some(event) = collab.wait_for_event() {
                logging::log_event(&event);
                sse.broadcast(event.into());
            }
        });

        self.runtime
            .block_on(run_server(self.context.clone(), &self.config))
            .map_err(MeshcallError::Server)
    }
}

impl MeshcallError {
    fn hint(&self) -> String {
        match self {
            MeshcallError::Runtime(_) => "The operating system refused to start threads. Check the process limits and try again.".to_string(),
            MeshcallError::Server(_) => "Make sure no other process is using the port, or pick another one with MESHCALL_SERVER_PORT.".to_string(),
        }
    }
}

fn main() {
    if let Err(e) = logging::init_logger() {
        eprintln!("Could not initialize logging: {}", e);
    }

    let result = Meshcall::new().and_then(|meshcall| {
        info!("Initialized successfully.");
        meshcall.run()
    });

    if let Err(error) = result {
        error!("{} Read the error below to troubleshoot the issue. If you think this might be a bug, please report it by making a GitHub issue.", "meshcall failed to start!".bold().red());
        error!("{}", error);
        error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
    }
}
