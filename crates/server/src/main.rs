use anyhow::Result;
use clap::Parser;
use tracing::error;
use vision_chat_server::{Args, BackboneRegistry, logging, run};

#[rocket::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    match run(args, BackboneRegistry::new()).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(error = %err, "Server failed");
            Err(err)
        }
    }
}
