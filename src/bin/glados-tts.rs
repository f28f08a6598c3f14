//! Interactive GLaDOS text-to-speech.
//!
//! Usage:
//!   glados-tts --models-dir models
//!   glados-tts --config glados.json --text "The cake is a lie."
//!   glados-tts --player none --output out.wav --text "Offline render."
//!
//! Each line typed at the `Input:` prompt is spoken sentence by sentence and
//! written to the output WAV.  Ctrl-C while speaking stops the utterance;
//! Ctrl-C at the prompt (or end of input) exits.

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use glados_tts::{
    check_player, AudioSink, Config, Device, GladosTts, NullSink, OnnxLoader, PlayerConfig,
    PlayerSink,
};

#[derive(Parser)]
#[command(name = "glados-tts")]
#[command(about = "Speak text in the GLaDOS voice", long_about = None)]
struct Cli {
    /// JSON config file; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding emb/, glados-new.pt, vocoder-gpu.pt and the G2P checkpoint.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Use emb/glados_p1.pt instead of emb/glados_p2.pt.
    #[arg(long)]
    use_alternate_embedding: bool,

    /// Log per-stage latencies.
    #[arg(long, short)]
    verbose_timing: bool,

    /// Speech rate; 1.0 is normal.
    #[arg(long)]
    speed: Option<f32>,

    /// Silence between sentences, in seconds.
    #[arg(long)]
    pause: Option<f64>,

    /// Where each utterance is saved as WAV.
    #[arg(long)]
    output: Option<PathBuf>,

    /// cpu, cuda or mps.
    #[arg(long)]
    device: Option<String>,

    /// Audio player program, or `none` to render without playback.
    #[arg(long)]
    player: Option<String>,

    /// Speak this text once and exit instead of prompting.
    #[arg(long)]
    text: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<(Config, Option<String>)> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(dir) = self.models_dir {
            config.models_directory = dir;
        }
        if self.use_alternate_embedding {
            config.use_alternate_embedding = true;
        }
        if self.verbose_timing {
            config.verbose_timing = true;
        }
        if let Some(speed) = self.speed {
            config.speed_factor = speed;
        }
        if let Some(pause) = self.pause {
            config.inter_sentence_pause_seconds = pause;
        }
        if let Some(output) = self.output {
            config.output_path = Some(output);
        }
        if let Some(device) = &self.device {
            config.device = device.parse::<Device>()?;
        }
        match self.player.as_deref() {
            None | Some("none") => {}
            Some(program) => {
                config.player = Some(PlayerConfig {
                    program: program.to_string(),
                    args: Vec::new(),
                })
            }
        }
        config.validate()?;
        Ok((config, self.text))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Prompt {
    Line,
    Skip,
    Eof,
}

/// Read one line into `line`.  Undecodable input is logged and skipped so a
/// stray byte does not end the session.
fn read_prompt(input: &mut impl BufRead, line: &mut String) -> Result<Prompt> {
    line.clear();
    match input.read_line(line) {
        Ok(0) => Ok(Prompt::Eof),
        Ok(_) => Ok(Prompt::Line),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            error!("skipping unreadable input: {e}");
            Ok(Prompt::Skip)
        }
        Err(e) => Err(e).context("Failed to read from stdin"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let offline = cli.player.as_deref() == Some("none");
    let default_filter = if cli.verbose_timing { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let (config, text) = cli.into_config()?;

    let mut sink: Box<dyn AudioSink> = if offline {
        Box::new(NullSink)
    } else {
        let player = config.player.clone().unwrap_or_else(PlayerSink::default_player);
        check_player(&player)?;
        Box::new(PlayerSink::new(player))
    };

    let mut tts = GladosTts::load(&config, &OnnxLoader)?;

    // Ctrl-C cancels the utterance in progress, or exits at the prompt.
    let speaking = Arc::new(AtomicBool::new(false));
    let cancel = tts.pacer().cancel_handle();
    {
        let speaking = Arc::clone(&speaking);
        ctrlc::set_handler(move || {
            if speaking.load(Ordering::SeqCst) {
                cancel.store(true, Ordering::SeqCst);
            } else {
                println!();
                std::process::exit(0);
            }
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let mut say = |line: &str| -> Result<()> {
        if offline {
            let audio = tts.render_to_file(line)?;
            info!("rendered {:.2} s", audio.duration().as_secs_f64());
            return Ok(());
        }
        speaking.store(true, Ordering::SeqCst);
        let result = tts.speak(line, &mut sink);
        speaking.store(false, Ordering::SeqCst);
        let report = result?;
        if !report.completed {
            info!("stopped after {} sentence(s)", report.segments.len());
        }
        Ok(())
    };

    if let Some(text) = text {
        return say(&text);
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("Input: ");
        io::stdout().flush()?;
        match read_prompt(&mut stdin.lock(), &mut line)? {
            Prompt::Line => {}
            Prompt::Skip => continue,
            Prompt::Eof => {
                println!();
                return Ok(());
            }
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        // One bad utterance must not end the session.
        if let Err(e) = say(input) {
            if e.downcast_ref::<glados_tts::TtsError>().is_some_and(|e| e.is_fatal()) {
                return Err(e);
            }
            error!("{e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut input = Cursor::new(b"\xff\xfe\nThe cake is a lie.\n".to_vec());
        let mut line = String::new();
        assert_eq!(read_prompt(&mut input, &mut line).unwrap(), Prompt::Skip);
        assert_eq!(read_prompt(&mut input, &mut line).unwrap(), Prompt::Line);
        assert_eq!(line.trim(), "The cake is a lie.");
        assert_eq!(read_prompt(&mut input, &mut line).unwrap(), Prompt::Eof);
    }
}
