//! Producer → consumer link between the subject crawl and the merge writer.
//!
//! The link has an explicit capacity and an explicit completion message, so a
//! consumer can tell "producer finished" apart from "producer went away".

use tokio::sync::mpsc;

use super::cancel::CancelToken;
use crate::error::{Result, ScraperError};

#[derive(Debug)]
enum StageMessage<T> {
    Item(T),
    Finished { sent: usize },
}

/// What the consumer observed on its side of the link.
#[derive(Debug, PartialEq)]
pub enum Received<T> {
    Item(T),
    /// The producer sent every item it intended to.
    Finished { sent: usize },
    /// The producer dropped its side without finishing.
    Closed,
}

pub struct StageSender<T> {
    tx: mpsc::Sender<StageMessage<T>>,
    cancel: CancelToken,
    sent: usize,
}

pub struct StageReceiver<T> {
    rx: mpsc::Receiver<StageMessage<T>>,
    cancel: CancelToken,
}

pub fn stage_link<T>(capacity: usize, cancel: CancelToken) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StageSender { tx, cancel: cancel.clone(), sent: 0 },
        StageReceiver { rx, cancel },
    )
}

impl<T> StageSender<T> {
    /// Waits for buffer space (backpressure) unless the run is cancelled.
    pub async fn send(&mut self, item: T) -> Result<()> {
        self.cancel
            .guard(self.tx.send(StageMessage::Item(item)))
            .await?
            .map_err(|_| ScraperError::StageClosed("consumer stopped before the crawl finished".into()))?;
        self.sent += 1;
        Ok(())
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// True once the consumer has gone away; further sends would fail.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Signals completion; the consumer may publish once it sees this.
    pub async fn finish(self) -> Result<()> {
        let sent = self.sent;
        self.cancel
            .guard(self.tx.send(StageMessage::Finished { sent }))
            .await?
            .map_err(|_| ScraperError::StageClosed("consumer stopped before completion".into()))
    }
}

impl<T> StageReceiver<T> {
    pub async fn recv(&mut self) -> Result<Received<T>> {
        let message = self.cancel.guard(self.rx.recv()).await?;
        Ok(match message {
            Some(StageMessage::Item(item)) => Received::Item(item),
            Some(StageMessage::Finished { sent }) => Received::Finished { sent },
            None => Received::Closed,
        })
    }
}
