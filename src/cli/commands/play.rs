//! `jukebox play`: queue files and drive playback from stdin.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::collect_audio_files;
use super::console::{ConsoleCommand, HELP};
use crate::config;
use crate::error::{Error, ResultExt};
use crate::jukebox::{Item, Jukebox};
use crate::player::{self, Backend};
use crate::transcode::{self, Engine};

/// Build a jukebox from config + overrides and run the console until quit.
pub fn cmd_play(
    rt: &Runtime,
    paths: &[PathBuf],
    backend: Option<Backend>,
    engine: Option<Engine>,
    device: Option<&str>,
    gain: Option<f32>,
) -> anyhow::Result<()> {
    let mut config = config::load();
    if let Some(backend) = backend {
        config.audio.backend = backend;
    }
    if let Some(engine) = engine {
        config.transcode.engine = engine;
    }
    if let Some(device) = device {
        config.audio.output_device = device.to_string();
    }
    if let Some(gain) = gain {
        config.audio.volume = gain;
    }

    let profile = config.transcode.profile();
    let transcoder = transcode::transcoder_for(config.transcode.engine, &config.transcode.ffmpeg_path);
    info!(
        backend = ?config.audio.backend,
        engine = ?config.transcode.engine,
        "Starting jukebox"
    );

    let jukebox = Jukebox::new(transcoder, profile, |reader, profile| {
        player::open(config.audio.backend, reader, profile, &config)
    })
    .with_context(format!("opening {:?} output", config.audio.backend))?;

    let mut console = Console::new(jukebox);
    if !paths.is_empty() {
        let items = console.items_for(paths)?;
        println!("Queued {} tracks", items.len());
        console.jukebox.set_items(items);
        console.jukebox.play();
    }

    println!("Type 'help' for commands.");
    rt.block_on(console.run());
    Ok(())
}

struct Console {
    jukebox: Arc<Jukebox>,
    next_id: i64,
}

impl Console {
    fn new(jukebox: Jukebox) -> Self {
        Self {
            jukebox: Arc::new(jukebox),
            next_id: 0,
        }
    }

    async fn run(mut self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(&line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Reading stdin failed: {}", e);
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            }
        }

        let jukebox = Arc::clone(&self.jukebox);
        if let Err(e) = tokio::task::spawn_blocking(move || jukebox.quit()).await {
            warn!("Quit task failed: {}", e);
        }
        println!("Bye.");
    }

    /// Apply one line. Returns `false` to stop the console.
    async fn handle_line(&mut self, line: &str) -> bool {
        let command = match ConsoleCommand::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(e) => {
                eprintln!("{}", e);
                return true;
            }
        };

        match command {
            ConsoleCommand::Quit => return false,
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::List => self.print_list(),
            ConsoleCommand::Status { json } => self.print_status(json),
            ConsoleCommand::Gain(None) => println!("gain {:.0}%", self.jukebox.gain() * 100.0),
            ConsoleCommand::Gain(Some(v)) => self.jukebox.set_gain(v),
            ConsoleCommand::Add(paths) => match self.items_for(&paths) {
                Ok(items) => {
                    println!("Added {} tracks", items.len());
                    self.jukebox.append_items(items);
                }
                Err(e) => eprintln!("{}", e),
            },
            ConsoleCommand::Set(paths) => match self.items_for(&paths) {
                Ok(items) => {
                    println!("Queued {} tracks", items.len());
                    self.jukebox.set_items(items);
                }
                Err(e) => eprintln!("{}", e),
            },
            ConsoleCommand::Remove(index) => {
                if let Err(e) = self.jukebox.remove_item(index).with_context(format!("remove {}", index + 1)) {
                    eprintln!("{}", e);
                }
            }
            // Transport calls wait on the control loop, so keep them off the runtime
            other => {
                let jukebox = Arc::clone(&self.jukebox);
                let result = tokio::task::spawn_blocking(move || match other {
                    ConsoleCommand::Skip { index, offset } => jukebox
                        .skip(index, offset)
                        .with_context(format!("skip {}", index + 1)),
                    ConsoleCommand::Play => {
                        jukebox.play();
                        Ok(())
                    }
                    ConsoleCommand::Pause => {
                        jukebox.pause();
                        Ok(())
                    }
                    ConsoleCommand::Clear => {
                        jukebox.clear();
                        Ok(())
                    }
                    _ => Ok(()),
                })
                .await;
                match result {
                    Ok(Err(e)) => eprintln!("{}", e),
                    Err(e) => warn!("Console task failed: {}", e),
                    Ok(Ok(())) => {}
                }
            }
        }
        true
    }

    /// Expand paths into new items. Nothing is queued if any path is missing.
    fn items_for(&mut self, paths: &[PathBuf]) -> crate::error::Result<Vec<Item>> {
        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            return Err(Error::not_found(missing));
        }
        Ok(paths
            .iter()
            .flat_map(|p| collect_audio_files(p))
            .map(|path| {
                let item = Item::new(self.next_id, path);
                self.next_id += 1;
                item
            })
            .collect())
    }

    fn print_list(&self) {
        let current = self.jukebox.status().current_index;
        let items = self.jukebox.items();
        if items.is_empty() {
            println!("(empty)");
        }
        for (i, item) in items.iter().enumerate() {
            let marker = if current == Some(i) { '>' } else { ' ' };
            println!("{} {:>3}. {}", marker, i + 1, item.display_title());
        }
    }

    fn print_status(&self, json: bool) {
        let status = self.jukebox.status();
        if json {
            match serde_json::to_string(&status) {
                Ok(s) => println!("{}", s),
                Err(e) => eprintln!("{}", e),
            }
        } else {
            println!("{}", status.summary(self.jukebox.items().len()));
        }
    }
}
