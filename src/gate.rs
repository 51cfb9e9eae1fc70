use tokio::sync::{Notify, watch};

/// Shared handle the paused agent waits on.
///
/// The pause action itself never touches stdin. Whoever owns the front end
/// (the terminal loop, the web panel) calls `resume()` when the operator is
/// done; a shutdown signal cancels the wait so a headless run can still exit.
/// How the operator releases a pause in the current front end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResumeSource {
    Terminal,
    Panel,
}

impl ResumeSource {
    pub fn instruction(self) -> &'static str {
        match self {
            ResumeSource::Terminal => "When you are finished, press [Enter] here to continue.",
            ResumeSource::Panel => "When you are finished, click Resume in the web panel.",
        }
    }
}

pub struct UserGate {
    resume: Notify,
    shutdown: watch::Receiver<bool>,
    source: ResumeSource,
}

#[derive(Debug, PartialEq)]
pub enum GateResult {
    Resumed,
    Cancelled,
}

impl UserGate {
    pub fn new(shutdown: watch::Receiver<bool>, source: ResumeSource) -> Self {
        Self {
            resume: Notify::new(),
            shutdown,
            source,
        }
    }

    /// The banner line telling the operator how to resume from here.
    pub fn resume_instruction(&self) -> &'static str {
        self.source.instruction()
    }

    /// Release a pending (or the next) `wait()`.
    pub fn resume(&self) {
        self.resume.notify_one();
    }

    /// Block until the operator resumes or the process is shutting down.
    pub async fn wait(&self) -> GateResult {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = self.resume.notified() => GateResult::Resumed,
            _ = shutdown.wait_for(|stop| *stop) => GateResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_resume() {
        let (_tx, rx) = watch::channel(false);
        let gate = Arc::new(UserGate::new(rx, ResumeSource::Terminal));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        // Let the waiter register before signalling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.resume();

        assert_eq!(waiter.await.unwrap(), GateResult::Resumed);
    }

    #[tokio::test]
    async fn wait_is_cancelled_by_shutdown() {
        let (tx, rx) = watch::channel(false);
        let gate = Arc::new(UserGate::new(rx, ResumeSource::Terminal));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        assert_eq!(waiter.await.unwrap(), GateResult::Cancelled);
    }

    #[tokio::test]
    async fn wait_does_not_return_without_a_signal() {
        let (_tx, rx) = watch::channel(false);
        let gate = UserGate::new(rx, ResumeSource::Terminal);

        let timed =
            tokio::time::timeout(Duration::from_millis(50), gate.wait()).await;
        assert!(timed.is_err(), "gate released without resume or shutdown");
    }

    #[test]
    fn resume_instruction_matches_the_front_end() {
        let (_tx, rx) = watch::channel(false);
        let terminal = UserGate::new(rx.clone(), ResumeSource::Terminal);
        assert!(terminal.resume_instruction().contains("[Enter]"));

        let panel = UserGate::new(rx, ResumeSource::Panel);
        assert!(panel.resume_instruction().contains("panel"));
        assert!(!panel.resume_instruction().contains("[Enter]"));
    }
}
