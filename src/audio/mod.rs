pub mod chime;

use chime::Chime;

use log::warn;
use rodio::{OutputStream, Sink};
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;

use crate::models::Phase;

enum AudioCommand {
    Chime { phase: Phase, volume: f32 },
    Stop,
}

/// Owns the audio thread. rodio's output stream is not `Send`, so it is
/// created and kept on that thread and driven through a channel.
#[derive(Clone)]
pub struct ChimePlayer {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
}

impl ChimePlayer {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, String> {
        let mut slot = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = slot.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        thread::Builder::new()
            .name("tomato-chime".to_string())
            .spawn(move || run_chime_thread(rx))
            .map_err(|e| format!("Failed to start chime thread: {e}"))?;

        *slot = Some(tx.clone());
        Ok(tx)
    }

    /// Queues the completion chime for `phase`. Playback happens on the audio
    /// thread; device errors there are logged, not returned.
    pub fn play(&self, phase: Phase, volume: f32) -> Result<(), String> {
        let tx = self.ensure_thread()?;
        tx.send(AudioCommand::Chime { phase, volume })
            .map_err(|e| e.to_string())
    }

    /// Cuts a chime short. A player that never chimed has nothing to stop.
    pub fn stop(&self) -> Result<(), String> {
        let slot = self.tx.lock().map_err(|e| e.to_string())?;
        match slot.as_ref() {
            Some(tx) => tx
                .send(AudioCommand::Stop)
                .map_err(|e| format!("Chime thread is gone: {e}")),
            None => Ok(()),
        }
    }
}

/// The output device is opened lazily on the first chime and released on
/// `Stop`, so an idle daemon holds no audio device.
fn run_chime_thread(rx: mpsc::Receiver<AudioCommand>) {
    let mut output: Option<(OutputStream, Sink)> = None;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            AudioCommand::Chime { phase, volume } => {
                if output.is_none() {
                    match open_output() {
                        Ok(opened) => output = Some(opened),
                        Err(err) => {
                            warn!("Chime skipped: {err}");
                            continue;
                        }
                    }
                }
                if let Some((_, sink)) = output.as_ref() {
                    let chime = match phase {
                        Phase::Work => Chime::work_done(volume),
                        Phase::Break => Chime::break_done(volume),
                    };
                    sink.append(chime);
                    sink.play();
                }
            }
            AudioCommand::Stop => {
                if let Some((_stream, sink)) = output.take() {
                    sink.stop();
                }
            }
        }
    }
}

fn open_output() -> Result<(OutputStream, Sink), String> {
    let (stream, handle) = OutputStream::try_default()
        .map_err(|e| format!("No audio output device: {e}"))?;
    let sink = Sink::try_new(&handle).map_err(|e| format!("Failed to create audio sink: {e}"))?;
    Ok((stream, sink))
}

impl Default for ChimePlayer {
    fn default() -> Self {
        Self::new()
    }
}
