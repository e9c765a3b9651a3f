use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fennec_config::Replication;
use fennec_stats::ReplicationStats;

use crate::backend::executor::{Executor, ExecutorError};
use crate::net::{CopyData, ReplicationMeta, StatusUpdate};

use super::decode::{ChangeDecoder, ChangeStreamMessage, ControlMessage};
use super::error::Error;
use super::init::setup_shard;
use super::publication::{upstream_publications, validate_publications};
use super::watermark::{Lsn, Watermark};

/// Named interface to the replication wire. The driver underneath is an
/// external collaborator; the change source only needs these three calls.
#[async_trait]
pub trait ReplicationConnection: Send {
    /// Issue `START_REPLICATION SLOT ... LOGICAL` at the given position.
    async fn start_replication(
        &mut self,
        slot: &str,
        lsn: Lsn,
        publications: &[String],
    ) -> Result<(), Error>;

    /// Next CopyData frame; `None` when the upstream closed the stream.
    async fn recv(&mut self) -> Result<Option<CopyData>, Error>;

    /// Send a standby status update.
    async fn send_status(&mut self, status: StatusUpdate) -> Result<(), Error>;
}

/// Per-stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Starting,
    Streaming,
    Cancelled,
    Failed,
    ResetRequired,
}

/// Consumer end of the change stream.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::Receiver<Result<ChangeStreamMessage, Error>>,
    cancel: CancellationToken,
    state: Arc<Mutex<StreamState>>,
}

impl ChangeStream {
    /// Next message, or `None` when the stream ended.
    pub async fn next(&mut self) -> Option<Result<ChangeStreamMessage, Error>> {
        self.rx.recv().await
    }

    /// Release the slot; the iterator terminates cleanly on the consumer
    /// side.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }
}

/// Ack side-channel: confirming a watermark advances the slot's confirmed
/// flush position.
#[derive(Clone, Debug)]
pub struct AckSender {
    tx: mpsc::Sender<Watermark>,
}

impl AckSender {
    pub async fn ack(&self, watermark: Watermark) {
        let _ = self.tx.send(watermark).await;
    }
}

/// The change source: owns shard state upstream and produces watermarked
/// change streams from logical replication.
pub struct ChangeSource {
    config: Replication,
    executor: Arc<dyn Executor>,
    ddl_detection: bool,
    slot: String,
    stats: Arc<Mutex<ReplicationStats>>,
}

impl ChangeSource {
    /// Idempotent shard setup, publication validation and the auto-reset
    /// check, in that order.
    pub async fn initialize(
        config: Replication,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, Error> {
        let ddl_detection = setup_shard(executor.as_ref(), &config).await?;
        validate_publications(executor.as_ref(), &config.publications).await?;

        let upstream = upstream_publications(executor.as_ref()).await?;
        let missing: Vec<&String> = config
            .publications
            .iter()
            .filter(|p| !upstream.contains(p))
            .collect();
        if !missing.is_empty() {
            return Err(Error::AutoResetSignal {
                configured: config.publications.clone(),
                upstream,
            });
        }

        let slot = format!("{}_{}", config.app_id, config.shard_num);
        info!(
            "change source initialized for shard {} (ddl detection: {})",
            config.shard_num, ddl_detection
        );

        Ok(Self {
            config,
            executor,
            ddl_detection,
            slot,
            stats: Arc::new(Mutex::new(ReplicationStats::default())),
        })
    }

    pub fn stats(&self) -> Arc<Mutex<ReplicationStats>> {
        self.stats.clone()
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Open a change stream beginning at the first commit past
    /// `from_watermark`. The slot may still be held by a previous owner;
    /// retry a bounded number of times with short backoff. Fails with
    /// `AutoResetSignal` when the configured publications have gone
    /// missing upstream.
    pub async fn start_stream(
        &self,
        from_watermark: Watermark,
        mut conn: Box<dyn ReplicationConnection>,
    ) -> Result<(ChangeStream, AckSender), Error> {
        let upstream = upstream_publications(self.executor.as_ref()).await?;
        if self
            .config
            .publications
            .iter()
            .any(|p| !upstream.contains(p))
        {
            return Err(Error::AutoResetSignal {
                configured: self.config.publications.clone(),
                upstream,
            });
        }

        let lsn = from_watermark.to_lsn()?;

        let mut attempt = 0;
        loop {
            match conn
                .start_replication(&self.slot, lsn, &self.config.publications)
                .await
            {
                Ok(()) => break,
                Err(Error::Executor(ExecutorError::ObjectInUse(_)))
                    if attempt + 1 < self.config.slot_retry_attempts =>
                {
                    attempt += 1;
                    debug!(
                        "slot \"{}\" busy, retry {}/{}",
                        self.slot, attempt, self.config.slot_retry_attempts
                    );
                    tokio::time::sleep(self.config.slot_retry_delay_duration()).await;
                }
                Err(Error::Executor(ExecutorError::ObjectInUse(_))) => {
                    return Err(Error::SlotBusy(self.config.slot_retry_attempts));
                }
                Err(err) => return Err(err),
            }
        }

        let (tx, rx) = mpsc::channel(256);
        let (ack_tx, ack_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(StreamState::Streaming));

        let decoder = ChangeDecoder::new(
            &self.config.app_id,
            self.config.shard_num,
            self.ddl_detection,
        );

        tokio::spawn(run_stream(
            conn,
            decoder,
            from_watermark,
            tx,
            ack_rx,
            cancel.clone(),
            state.clone(),
            self.stats.clone(),
        ));

        Ok((
            ChangeStream { rx, cancel, state },
            AckSender { tx: ack_tx },
        ))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_stream(
    mut conn: Box<dyn ReplicationConnection>,
    mut decoder: ChangeDecoder,
    from_watermark: Watermark,
    tx: mpsc::Sender<Result<ChangeStreamMessage, Error>>,
    mut ack_rx: mpsc::Receiver<Watermark>,
    cancel: CancellationToken,
    state: Arc<Mutex<StreamState>>,
    stats: Arc<Mutex<ReplicationStats>>,
) {
    // Whole transactions at or before the resume point are replayed by the
    // slot but must not reach the consumer.
    let mut skipping = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                *state.lock() = StreamState::Cancelled;
                debug!("change stream cancelled, releasing slot");
                return;
            }

            watermark = ack_rx.recv() => {
                if let Some(watermark) = watermark {
                    match watermark.to_lsn() {
                        Ok(lsn) => {
                            stats.lock().last_acked = watermark.to_string();
                            if let Err(err) = conn.send_status(StatusUpdate::ack(lsn.lsn)).await {
                                warn!("status update failed: {}", err);
                            }
                        }
                        Err(err) => warn!("unackable watermark: {}", err),
                    }
                }
            }

            frame = conn.recv() => {
                match frame {
                    Ok(Some(data)) => {
                        if let Some(xlog) = data.xlog_data() {
                            stats.lock().bytes += data.payload().len() as u64;
                            let messages = match decoder.decode(&xlog) {
                                Ok(messages) => messages,
                                Err(err) => {
                                    *state.lock() = StreamState::Failed;
                                    let _ = tx.send(Err(err)).await;
                                    return;
                                }
                            };
                            stats.lock().filtered = decoder.filtered();

                            for message in messages {
                                match &message {
                                    ChangeStreamMessage::Begin { commit_watermark } => {
                                        skipping = *commit_watermark <= from_watermark;
                                        if skipping {
                                            continue;
                                        }
                                    }
                                    ChangeStreamMessage::Commit { watermark } => {
                                        if skipping {
                                            skipping = false;
                                            continue;
                                        }
                                        let mut stats = stats.lock();
                                        stats.transactions += 1;
                                        stats.last_watermark = watermark.to_string();
                                    }
                                    ChangeStreamMessage::Data(_) => {
                                        if skipping {
                                            continue;
                                        }
                                        stats.lock().messages += 1;
                                    }
                                    ChangeStreamMessage::Control(ControlMessage::ResetRequired) => {
                                        *state.lock() = StreamState::ResetRequired;
                                        let _ = tx.send(Ok(message)).await;
                                        return;
                                    }
                                    ChangeStreamMessage::Rollback => (),
                                }

                                if tx.send(Ok(message)).await.is_err() {
                                    // Consumer went away; treat as cancel.
                                    *state.lock() = StreamState::Cancelled;
                                    return;
                                }
                            }
                        } else if let Ok(ReplicationMeta::KeepAlive(keepalive)) =
                            data.replication_meta()
                        {
                            if keepalive.reply == 1 {
                                let update = StatusUpdate::from(keepalive);
                                if let Err(err) = conn.send_status(update).await {
                                    warn!("keepalive reply failed: {}", err);
                                }
                            }
                        }
                    }
                    Ok(None) | Err(Error::Executor(ExecutorError::ConnectionLost)) => {
                        // The slot was taken over or the backend died.
                        *state.lock() = StreamState::Failed;
                        let _ = tx.send(Err(Error::Abort)).await;
                        return;
                    }
                    Err(err) => {
                        *state.lock() = StreamState::Failed;
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use super::super::decode::DataChange;
    use super::*;
    use crate::backend::executor::testing::ScriptedExecutor;
    use crate::net::messages::replication::logical::relation::Column as RelColumn;
    use crate::net::messages::replication::logical::tuple_data::Column as TCol;
    use crate::net::messages::ToBytes;
    use crate::net::{Begin, Commit, Insert, KeepAlive, Relation, TupleData, XLogData};

    struct MockConnection {
        frames: VecDeque<CopyData>,
        statuses: Arc<Mutex<Vec<StatusUpdate>>>,
        started: Arc<Mutex<Vec<String>>>,
        busy_first: usize,
        /// Terminate the stream when frames run out, as a killed slot does.
        eof: bool,
    }

    impl MockConnection {
        fn new(frames: Vec<CopyData>) -> Self {
            Self {
                frames: frames.into(),
                statuses: Arc::new(Mutex::new(vec![])),
                started: Arc::new(Mutex::new(vec![])),
                busy_first: 0,
                eof: false,
            }
        }
    }

    #[async_trait]
    impl ReplicationConnection for MockConnection {
        async fn start_replication(
            &mut self,
            slot: &str,
            _lsn: Lsn,
            _publications: &[String],
        ) -> Result<(), Error> {
            if self.busy_first > 0 {
                self.busy_first -= 1;
                return Err(Error::Executor(ExecutorError::ObjectInUse(slot.into())));
            }
            self.started.lock().push(slot.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<CopyData>, Error> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.eof => Ok(None),
                None => {
                    // Keep the stream open for the ack channel.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn send_status(&mut self, status: StatusUpdate) -> Result<(), Error> {
            self.statuses.lock().push(status);
            Ok(())
        }
    }

    fn frame(payload: bytes::Bytes, lsn: i64) -> CopyData {
        CopyData::new(&XLogData::wrap(payload, lsn).to_bytes().unwrap())
    }

    fn tx_frames(lsn: i64, rows: &[&str]) -> Vec<CopyData> {
        let mut frames = vec![];
        frames.push(frame(
            Begin {
                final_lsn: lsn,
                commit_timestamp: 0,
                xid: 1,
            }
            .to_bytes()
            .unwrap(),
            lsn,
        ));
        for row in rows {
            frames.push(frame(
                Insert {
                    oid: 1,
                    tuple: TupleData {
                        columns: vec![TCol::Text(row.to_string())],
                    },
                }
                .to_bytes()
                .unwrap(),
                lsn,
            ));
        }
        frames.push(frame(
            Commit {
                flags: 0,
                commit_lsn: lsn,
                end_lsn: lsn + 1,
                commit_timestamp: 0,
            }
            .to_bytes()
            .unwrap(),
            lsn,
        ));
        frames
    }

    fn relation_frame() -> CopyData {
        frame(
            Relation {
                oid: 1,
                namespace: "public".into(),
                name: "foo".into(),
                replica_identity: b'd' as i8,
                columns: vec![RelColumn {
                    flag: 1,
                    name: "id".into(),
                    oid: 25,
                    type_modifier: -1,
                }],
            }
            .to_bytes()
            .unwrap(),
            0,
        )
    }

    async fn source() -> (ChangeSource, ScriptedExecutor) {
        let executor = ScriptedExecutor::new();
        // Publication checks.
        executor.push_rows(vec![vec![
            Some("app_pub".into()),
            Some("t".into()),
            Some("t".into()),
            Some("t".into()),
            Some("t".into()),
        ]]);
        executor.push_rows(vec![]); // no published tables to validate
        executor.push_rows(vec![vec![Some("app_pub".into())]]); // upstream pubs

        let mut config = Replication::default();
        config.publications = vec!["app_pub".into()];
        config.slot_retry_delay = 1;

        let source = ChangeSource::initialize(config, Arc::new(executor.clone()))
            .await
            .unwrap();
        (source, executor)
    }

    /// Queue the upstream-publication response `start_stream` checks.
    fn prime(executor: &ScriptedExecutor) {
        executor.push_rows(vec![vec![Some("app_pub".into())]]);
    }

    #[tokio::test]
    async fn test_stream_and_ack() {
        let (source, executor) = source().await;
        prime(&executor);

        let mut frames = vec![relation_frame()];
        frames.extend(tx_frames(100, &["hello", "world"]));
        let conn = MockConnection::new(frames);
        let statuses = conn.statuses.clone();

        let (mut stream, acks) = source
            .start_stream(Watermark::min(), Box::new(conn))
            .await
            .unwrap();

        assert!(matches!(
            stream.next().await,
            Some(Ok(ChangeStreamMessage::Begin { .. }))
        ));
        for expected in ["hello", "world"] {
            match stream.next().await {
                Some(Ok(ChangeStreamMessage::Data(DataChange::Insert { row, .. }))) => {
                    assert_eq!(
                        row["id"],
                        fennec_postgres_types::Value::String(expected.into())
                    );
                }
                other => panic!("expected insert, got {:?}", other),
            }
        }
        let watermark = match stream.next().await {
            Some(Ok(ChangeStreamMessage::Commit { watermark })) => watermark,
            other => panic!("expected commit, got {:?}", other),
        };

        acks.ack(watermark.clone()).await;
        // Give the stream task a beat to process the ack.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let statuses = statuses.lock();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].last_flushed, watermark.to_lsn().unwrap().lsn);
    }

    #[tokio::test]
    async fn test_replay_skips_acked_transactions() {
        let (source, executor) = source().await;
        prime(&executor);

        let mut frames = vec![relation_frame()];
        frames.extend(tx_frames(100, &["old"]));
        frames.extend(tx_frames(200, &["new"]));
        let conn = MockConnection::new(frames);

        let from = Watermark::from_lsn(Lsn::from_i64(100));
        let (mut stream, _acks) = source.start_stream(from, Box::new(conn)).await.unwrap();

        // The first transaction is entirely replay; the first thing out is
        // the begin of the second.
        match stream.next().await {
            Some(Ok(ChangeStreamMessage::Begin { commit_watermark })) => {
                assert_eq!(commit_watermark, Watermark::from_lsn(Lsn::from_i64(200)));
            }
            other => panic!("expected begin, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keepalive_reply() {
        let (source, executor) = source().await;
        prime(&executor);

        let keepalive = KeepAlive {
            wal_end: 42,
            system_clock: 0,
            reply: 1,
        };
        let conn = MockConnection::new(vec![CopyData::new(&keepalive.to_bytes().unwrap())]);
        let statuses = conn.statuses.clone();

        let (_stream, _acks) = source
            .start_stream(Watermark::min(), Box::new(conn))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let statuses = statuses.lock();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].last_flushed, 42);
    }

    #[tokio::test]
    async fn test_slot_busy_retries_then_fails() {
        let (source, executor) = source().await;
        prime(&executor);

        let mut conn = MockConnection::new(vec![]);
        conn.busy_first = 99;
        let err = source
            .start_stream(Watermark::min(), Box::new(conn))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SlotBusy(_)));

        prime(&executor);
        let mut conn = MockConnection::new(vec![]);
        conn.busy_first = 2;
        let started = conn.started.clone();
        source
            .start_stream(Watermark::min(), Box::new(conn))
            .await
            .unwrap();
        assert_eq!(started.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_slot_takeover_surfaces_abort() {
        let (source, executor) = source().await;
        prime(&executor);
        let mut conn = MockConnection::new(vec![]);
        conn.eof = true;

        let (mut stream, _acks) = source
            .start_stream(Watermark::min(), Box::new(conn))
            .await
            .unwrap();

        match stream.next().await {
            Some(Err(Error::Abort)) => (),
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(stream.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_start_stream_auto_reset_on_missing_publication() {
        let (source, executor) = source().await;
        // Upstream no longer has our publication.
        executor.push_rows(vec![vec![Some("other_pub".into())]]);

        let err = source
            .start_stream(Watermark::min(), Box::new(MockConnection::new(vec![])))
            .await
            .unwrap_err();
        match err {
            Error::AutoResetSignal { configured, upstream } => {
                assert_eq!(configured, vec!["app_pub".to_string()]);
                assert_eq!(upstream, vec!["other_pub".to_string()]);
            }
            other => panic!("expected auto reset, got {:?}", other),
        }
        assert!(err_requires_reset());
    }

    fn err_requires_reset() -> bool {
        Error::AutoResetSignal {
            configured: vec![],
            upstream: vec![],
        }
        .requires_reset()
    }

    #[tokio::test]
    async fn test_cancel_terminates() {
        let (source, executor) = source().await;
        prime(&executor);
        let conn = MockConnection::new(vec![]);

        let (mut stream, _acks) = source
            .start_stream(Watermark::min(), Box::new(conn))
            .await
            .unwrap();
        stream.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(stream.state(), StreamState::Cancelled);
        assert!(stream.next().await.is_none());
    }
}
