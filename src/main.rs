use std::io;
use std::path::PathBuf;

use anyhow::Result;
use spike_viewer::app::{Command, ConsoleApp};

fn main() -> Result<()> {
    env_logger::init();

    let mut app = ConsoleApp::default();
    let stdout = io::stdout();

    // Optional spike table to open at start-up
    if let Some(path) = std::env::args_os().nth(1) {
        app.execute(Command::Open(PathBuf::from(path)), &mut stdout.lock())?;
    } else {
        println!("Spike viewer. Type `help` for commands.");
    }

    app.run(io::stdin().lock(), stdout.lock())
}
