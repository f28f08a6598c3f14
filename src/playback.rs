//! Audio output.
//!
//! The pacing engine only knows [`AudioSink`]: `play` starts a segment and
//! returns immediately; the engine itself times how long the segment lasts.

use std::{
    path::PathBuf,
    process::{Child, Command},
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::audio::AudioSegment;
use crate::config::PlayerConfig;

pub trait AudioSink {
    /// Start playing `segment` without waiting for it to finish.
    fn play(&mut self, segment: &AudioSegment) -> Result<()>;

    /// Stop whatever is playing.  Called on cancellation.
    fn stop(&mut self) {}
}

impl<S: AudioSink + ?Sized> AudioSink for &mut S {
    fn play(&mut self, segment: &AudioSegment) -> Result<()> {
        (**self).play(segment)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn play(&mut self, segment: &AudioSegment) -> Result<()> {
        (**self).play(segment)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Discards audio.  Used headless and when only the WAV export matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&mut self, _segment: &AudioSegment) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// External player
// ─────────────────────────────────────────────────────────────────────────────

/// Plays each segment by writing it to a scratch WAV and spawning a player
/// program on it (`afplay` on macOS, `aplay -q` elsewhere).
///
/// Two scratch files alternate so the next segment never overwrites the one
/// still being read.
#[derive(Debug)]
pub struct PlayerSink {
    program: String,
    args: Vec<String>,
    scratch: [PathBuf; 2],
    next: usize,
    child: Option<Child>,
}

/// Distinguishes the scratch files of sinks living in the same process.
static NEXT_SINK_ID: AtomicUsize = AtomicUsize::new(0);

impl PlayerSink {
    pub fn new(player: PlayerConfig) -> Self {
        let dir = std::env::temp_dir();
        let pid = std::process::id();
        let id = NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            program: player.program,
            args: player.args,
            scratch: [
                dir.join(format!("glados-tts-{pid}-{id}-a.wav")),
                dir.join(format!("glados-tts-{pid}-{id}-b.wav")),
            ],
            next: 0,
            child: None,
        }
    }

    /// The default player for the platform this binary was built for.
    pub fn default_player() -> PlayerConfig {
        if cfg!(target_os = "macos") {
            PlayerConfig { program: "afplay".into(), args: Vec::new() }
        } else {
            PlayerConfig { program: "aplay".into(), args: vec!["-q".into()] }
        }
    }

    pub fn default_for_platform() -> Self {
        Self::new(Self::default_player())
    }

    /// Wait for the previous segment's player to exit so segments never
    /// overlap.  The engine only calls `play` once that segment's duration
    /// has elapsed, so this is at most the player's start-up slack.
    fn reap(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let status = child.wait().context("Failed to wait for audio player")?;
            if !status.success() {
                warn!("{} exited with {}", self.program, status);
            }
        }
        Ok(())
    }
}

impl AudioSink for PlayerSink {
    fn play(&mut self, segment: &AudioSegment) -> Result<()> {
        self.reap()?;

        let path = &self.scratch[self.next];
        self.next = 1 - self.next;
        segment.write_wav_to(path)?;

        debug!("playing {} via {}", path.display(), self.program);
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .spawn()
            .with_context(|| format!("Failed to start audio player {:?}", self.program))?;
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for PlayerSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.reap() {
                warn!("{e:#}");
            }
        }
        for path in &self.scratch {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Check that `program` can be spawned at all, so a missing player is
/// reported at startup instead of on the first utterance.
pub fn check_player(player: &PlayerConfig) -> Result<()> {
    match Command::new(&player.program).arg("--version").output() {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("audio player {:?} not found on PATH", player.program)
        }
        Err(e) => Err(e).with_context(|| format!("Cannot run audio player {:?}", player.program)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_accepts_anything() {
        let mut sink = NullSink;
        sink.play(&AudioSegment::from_samples(vec![1, 2, 3])).unwrap();
        sink.stop();
    }

    #[test]
    fn test_default_player() {
        let player = PlayerSink::default_player();
        assert!(!player.program.is_empty());
    }

    #[test]
    fn test_missing_player_reported() {
        let player = PlayerConfig { program: "glados-tts-no-such-player".into(), args: vec![] };
        let err = check_player(&player).unwrap_err();
        assert!(err.to_string().contains("not found"), "got: {err}");

        let mut sink = PlayerSink::new(player);
        assert!(sink.play(&AudioSegment::silence(std::time::Duration::from_millis(1))).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_player_sink_alternates_scratch_files() {
        // `true` ignores its arguments and exits 0.
        let mut sink = PlayerSink::new(PlayerConfig { program: "true".into(), args: vec![] });
        let seg = AudioSegment::from_samples(vec![0; 10]);
        sink.play(&seg).unwrap();
        sink.play(&seg).unwrap();
        assert!(sink.scratch[0].exists());
        assert!(sink.scratch[1].exists());
        assert_eq!(sink.next, 0);
        sink.stop();
    }

    #[test]
    fn test_sinks_do_not_share_scratch_files() {
        let a = PlayerSink::new(PlayerConfig { program: "true".into(), args: vec![] });
        let b = PlayerSink::new(PlayerConfig { program: "true".into(), args: vec![] });
        assert!(a.scratch.iter().all(|p| !b.scratch.contains(p)));
    }

    #[cfg(unix)]
    #[test]
    fn test_dropping_one_sink_keeps_another_sinks_audio() {
        let mut a = PlayerSink::new(PlayerConfig { program: "true".into(), args: vec![] });
        a.play(&AudioSegment::from_samples(vec![0; 10])).unwrap();
        drop(PlayerSink::new(PlayerConfig { program: "true".into(), args: vec![] }));
        assert!(a.scratch[0].exists());
        a.stop();
    }
}
