//! Looping playback of timed light sequences.

use std::sync::Arc;

use tokio::select;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::controller::LightApi;
use crate::models::Sequence;

/// Plays back at most one sequence at a time
///
/// Starting a new sequence stops the previous loop before the new one is
/// spawned; both start and stop wait for the old loop to actually exit.
pub struct Sequencer<L> {
    light: L,
    active: Mutex<Option<PlaybackLoop>>,
}

struct PlaybackLoop {
    seq: Arc<Sequence>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PlaybackLoop {
    async fn stop(self) {
        self.stop_tx.send(()).ok();
        self.task.await.ok();
    }
}

impl<L: LightApi + Clone + 'static> Sequencer<L> {
    pub fn new(light: L) -> Self {
        Self {
            light,
            active: Mutex::new(None),
        }
    }

    /// Start playback from step 0, stopping any previous loop first
    pub async fn start(&self, seq: Sequence) {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        let seq = Arc::new(seq);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(self.light.clone(), seq.clone(), stop_rx));

        *active = Some(PlaybackLoop { seq, stop_tx, task });
    }

    /// Stop playback and wait for the loop to exit
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            previous.stop().await;
        }
    }

    /// Currently playing sequence, if any
    pub async fn status(&self) -> Option<Arc<Sequence>> {
        self.active.lock().await.as_ref().map(|l| l.seq.clone())
    }
}

async fn run<L: LightApi>(light: L, seq: Arc<Sequence>, mut stop_rx: oneshot::Receiver<()>) {
    debug!(sequence = %seq.name, "sequencer loop started");

    if seq.steps.is_empty() {
        // Nothing to play; just wait for the stop signal
        stop_rx.await.ok();
    } else {
        let mut step = 0;
        // First tick fires almost immediately so playback starts right away
        let mut delay = Duration::from_millis(1);

        loop {
            select! {
                _ = &mut stop_rx => break,
                _ = sleep(delay) => {
                    if step >= seq.steps.len() {
                        step = 0;
                    }

                    let current = &seq.steps[step];
                    light.apply(&current.light);
                    delay = Duration::from_millis(current.duration);
                    step += 1;
                }
            }
        }
    }

    debug!(sequence = %seq.name, "sequencer loop terminated");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use crate::models::{Light, SequenceStep};

    use super::*;

    #[derive(Default, Clone)]
    struct Recorder(Arc<StdMutex<Vec<Light>>>);

    impl Recorder {
        fn calls(&self) -> Vec<Light> {
            self.0.lock().unwrap().clone()
        }
    }

    impl LightApi for Recorder {
        fn apply(&self, light: &Light) -> bool {
            self.0.lock().unwrap().push(light.clone());
            true
        }
    }

    fn light(color: &str, brightness: i32, switch: &str) -> Light {
        Light {
            color: Some(color.to_owned()),
            brightness: Some(brightness),
            switch: Some(switch.to_owned()),
        }
    }

    fn step(light: Light, duration: u64) -> SequenceStep {
        SequenceStep { light, duration }
    }

    #[tokio::test]
    async fn playback_follows_steps_and_wraps() {
        let seq = Sequence {
            name: "first".to_owned(),
            steps: vec![
                step(light("yellow", 1, "on"), 100),
                step(light("green", 2, "off"), 200),
            ],
        };

        let recorder = Recorder::default();
        let sequencer = Sequencer::new(recorder.clone());

        sequencer.start(seq.clone()).await;
        sleep(Duration::from_millis(450)).await;
        sequencer.stop().await;

        let calls = recorder.calls();
        assert!(calls.len() >= 3, "expected at least 3 calls, got {}", calls.len());
        assert_eq!(calls[0], seq.steps[0].light);
        assert_eq!(calls[1], seq.steps[1].light);
        // The loop wraps back to step 0 past the last step
        assert_eq!(calls[2], seq.steps[0].light);
    }

    #[tokio::test]
    async fn starting_a_sequence_replaces_the_running_one() {
        let a = Sequence {
            name: "a".to_owned(),
            steps: vec![step(light("yellow", 1, "on"), 30)],
        };
        let b = Sequence {
            name: "b".to_owned(),
            steps: vec![step(light("blue", 1, "on"), 30)],
        };

        let recorder = Recorder::default();
        let sequencer = Sequencer::new(recorder.clone());

        sequencer.start(a).await;
        sleep(Duration::from_millis(100)).await;
        sequencer.start(b).await;
        sleep(Duration::from_millis(100)).await;
        sequencer.stop().await;

        let calls = recorder.calls();
        let first_b = calls
            .iter()
            .position(|l| l.color.as_deref() == Some("blue"))
            .expect("sequence b never ran");

        // No step of the replaced sequence may run after the new one started
        assert!(calls[first_b..]
            .iter()
            .all(|l| l.color.as_deref() == Some("blue")));
    }

    #[tokio::test]
    async fn status_reports_the_loaded_sequence() {
        let seq = Sequence {
            name: "demo".to_owned(),
            steps: vec![step(light("red", 1, "on"), 1000)],
        };

        let recorder = Recorder::default();
        let sequencer = Sequencer::new(recorder);

        assert!(sequencer.status().await.is_none());

        sequencer.start(seq).await;
        assert_eq!(sequencer.status().await.unwrap().name, "demo");

        sequencer.stop().await;
        assert!(sequencer.status().await.is_none());
    }

    #[tokio::test]
    async fn stopping_an_idle_sequencer_is_a_no_op() {
        let sequencer = Sequencer::new(Recorder::default());
        sequencer.stop().await;
        assert!(sequencer.status().await.is_none());
    }

    #[tokio::test]
    async fn empty_sequence_applies_nothing() {
        let recorder = Recorder::default();
        let sequencer = Sequencer::new(recorder.clone());

        sequencer.start(Sequence {
            name: "empty".to_owned(),
            steps: Vec::new(),
        })
        .await;

        sleep(Duration::from_millis(50)).await;
        sequencer.stop().await;

        assert!(recorder.calls().is_empty());
    }
}
