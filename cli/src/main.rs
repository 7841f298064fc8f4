mod cli;
mod opts;

use std::{env, process};

use azdeploy_lib::{root_error, Error};
use clap::Parser;
use colored::*;
use opts::Opts;

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "azdeploy=info,azdeploy_lib=info");
    }
    pretty_env_logger::init();

    if let Err(err) = cli::run(opts).await {
        eprintln!("{} {:#}", "error:".red(), err);
        process::exit(root_error(&err).map_or(1, Error::exit_code));
    }
}
