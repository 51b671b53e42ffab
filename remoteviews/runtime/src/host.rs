//! Stdio host: reads producer envelopes, applies trees to a live view
//! hierarchy and forwards interactions back.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;

use crate::codec::{self, DecodeOptions, WireForm};
use crate::config::HostConfig;
use crate::engine::{ApplyParams, Engine};
use crate::error::HostError;
use crate::intent::{Intent, PendingIntent};
use crate::protocol::{self, HostEnvelope, ProducerEnvelope};
use crate::remote_views::RemoteViews;
use crate::resources::SizeF;
use crate::view::{InteractionHandler, NodeId, ViewTree};

/// Whether a failure with `code` leaves the producer and host out of step.
pub fn should_resync_for_error(code: &str) -> bool {
    matches!(
        code,
        "decode_error"
            | "frame_too_large"
            | "invalid_envelope"
            | "resync_required"
            | "rev_mismatch"
            | "patch_apply_error"
    )
}

/// A fresh apply is accepted as the first revision or the one after the last.
pub fn validate_apply_rev(last: Option<u64>, rev: u64) -> Result<(), HostError> {
    match last {
        None => Ok(()),
        Some(last) if rev == last.wrapping_add(1) => Ok(()),
        Some(_) => Err(HostError::RevMismatch { last, got: rev }),
    }
}

/// A reapply needs an applied tree and the revision after it.
pub fn validate_reapply_rev(last: Option<u64>, rev: u64) -> Result<(), HostError> {
    match last {
        None => Err(HostError::ResyncRequired),
        Some(last) if rev == last.wrapping_add(1) => Ok(()),
        Some(_) => Err(HostError::RevMismatch { last, got: rev }),
    }
}

/// Queues interactions as intent envelopes, dropping them when the
/// outbound queue is full.
#[derive(Debug)]
pub struct IntentForwarder {
    sid: String,
    outbound: SyncSender<HostEnvelope>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl IntentForwarder {
    pub fn new(sid: impl Into<String>, outbound: SyncSender<HostEnvelope>) -> Self {
        Self {
            sid: sid.into(),
            outbound,
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl InteractionHandler for IntentForwarder {
    fn on_interaction(&self, view_id: i32, pending: &PendingIntent, fill_in: Option<&Intent>) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = protocol::intent_envelope(
            self.sid.clone(),
            id,
            view_id,
            pending.clone(),
            fill_in.cloned(),
        );

        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped.is_power_of_two() {
                    tracing::warn!(dropped, view_id, "outbound queue full, dropping intent");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(view_id, "outbound queue closed, dropping intent");
                false
            }
        }
    }
}

/// Live state of one producer session.
pub struct HostSession {
    sid: String,
    engine: Engine,
    tree: Arc<RwLock<ViewTree>>,
    params: ApplyParams,
    root: Option<NodeId>,
    last_rev: Option<u64>,
    outbound: SyncSender<HostEnvelope>,
    resync_pending: AtomicBool,
}

impl HostSession {
    /// Interactions on applied views are forwarded to `outbound`.
    pub fn new(sid: impl Into<String>, engine: Engine, params: ApplyParams, outbound: SyncSender<HostEnvelope>) -> Self {
        let sid = sid.into();
        let forwarder = Arc::new(IntentForwarder::new(sid.clone(), outbound.clone()));
        Self {
            engine: engine.with_interaction_handler(forwarder),
            sid,
            tree: Arc::new(RwLock::new(ViewTree::new())),
            params,
            root: None,
            last_rev: None,
            outbound,
            resync_pending: AtomicBool::new(false),
        }
    }

    pub fn tree(&self) -> &Arc<RwLock<ViewTree>> {
        &self.tree
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn last_rev(&self) -> Option<u64> {
        self.last_rev
    }

    /// Announces the session to the producer.
    pub fn announce(&self) {
        self.enqueue_control_envelope(protocol::ready_envelope(self.sid.clone()));
    }

    /// Handles `envelope`, logging failures and requesting a resync when
    /// the failure desynchronized the session.
    pub async fn process(&mut self, envelope: ProducerEnvelope) {
        if let Err(err) = self.handle(envelope).await {
            self.fail(&err);
        }
    }

    /// Handles a frame the reader rejected before it became an envelope.
    pub fn reject_frame(&mut self, err: HostError) {
        self.fail(&err);
    }

    fn fail(&mut self, err: &HostError) {
        let code = err.code();
        tracing::warn!(%err, code, "failed to handle producer envelope");
        if should_resync_for_error(code) {
            self.request_resync(code);
        }
    }

    pub async fn handle(&mut self, envelope: ProducerEnvelope) -> Result<(), HostError> {
        match envelope {
            ProducerEnvelope::Apply {
                sid,
                rev,
                form,
                payload,
                available_size,
            } => {
                if self.is_foreign(&sid) {
                    return Ok(());
                }
                validate_apply_rev(self.last_rev, rev)?;
                let rv = self.decode_payload(form, &payload)?;
                let root = self.apply(rv, self.params_for(available_size)).await?;
                self.mark_applied(rev, root)
            }

            ProducerEnvelope::Reapply {
                sid,
                rev,
                form,
                payload,
                available_size,
            } => {
                if self.is_foreign(&sid) {
                    return Ok(());
                }
                validate_reapply_rev(self.last_rev, rev)?;
                let root = self.root.ok_or(HostError::ResyncRequired)?;
                let rv = self.decode_payload(form, &payload)?;
                let root = self.reapply(root, rv, self.params_for(available_size)).await?;
                self.mark_applied(rev, root)
            }

            ProducerEnvelope::Interact { sid, view_id } => {
                if self.is_foreign(&sid) {
                    return Ok(());
                }
                self.interact(view_id)
            }

            ProducerEnvelope::Error {
                sid,
                rev,
                code,
                message,
            } => {
                tracing::warn!(%sid, ?rev, %code, %message, "producer reported an error");
                if should_resync_for_error(&code) {
                    self.request_resync(&code);
                }
                Ok(())
            }
        }
    }

    fn is_foreign(&self, sid: &str) -> bool {
        let foreign = sid != self.sid;
        if foreign {
            tracing::warn!(sid, expected = %self.sid, "ignoring envelope for another session");
        }
        foreign
    }

    fn params_for(&self, available_size: Option<SizeF>) -> ApplyParams {
        ApplyParams {
            available_size: available_size.or(self.params.available_size),
            ..self.params
        }
    }

    fn decode_payload(&self, form: WireForm, payload: &str) -> Result<RemoteViews, HostError> {
        let bytes = STANDARD.decode(payload)?;
        Ok(codec::decode(&bytes, form, self.engine.resolver(), DecodeOptions::default())?)
    }

    /// Inflates `rv` from scratch, replacing the current root.
    async fn apply(&mut self, rv: RemoteViews, params: ApplyParams) -> Result<NodeId, HostError> {
        let root = if rv.prefers_async_apply() {
            self.engine
                .apply_async(self.tree.clone(), rv, params)
                .finish()
                .await?
        } else {
            let mut tree = self.tree.write();
            self.engine.apply(&mut tree, &rv, &params)?
        };

        if let Some(previous) = self.root.replace(root) {
            self.tree.write().remove(previous);
        }
        Ok(root)
    }

    /// Reapplies onto `root`, falling back to a fresh apply when the views
    /// came from another layout.
    async fn reapply(&mut self, root: NodeId, rv: RemoteViews, params: ApplyParams) -> Result<NodeId, HostError> {
        let recyclable = self.engine.can_recycle(&self.tree.read(), root, &rv, &params);
        if !recyclable {
            tracing::debug!(layout_id = rv.layout_id(), "layout changed, applying from scratch");
            return self.apply(rv, params).await;
        }

        if rv.prefers_async_apply() {
            self.engine
                .reapply_async(self.tree.clone(), root, rv, params)
                .finish()
                .await?;
        } else {
            let mut tree = self.tree.write();
            self.engine.reapply(&mut tree, root, &rv, &params)?;
        }
        Ok(root)
    }

    fn mark_applied(&mut self, rev: u64, root: NodeId) -> Result<(), HostError> {
        let root_view_id = self.tree.read().node(root)?.view_id();
        self.last_rev = Some(rev);
        self.resync_pending.store(false, Ordering::Release);
        self.enqueue_control_envelope(protocol::applied_envelope(self.sid.clone(), rev, root_view_id));
        Ok(())
    }

    fn interact(&self, view_id: i32) -> Result<(), HostError> {
        let root = self.root.ok_or(HostError::UnknownView(view_id))?;
        let tree = self.tree.read();
        let node = tree
            .find_view_by_id(root, view_id)
            .ok_or(HostError::UnknownView(view_id))?;
        if !tree.perform_click(node)? {
            tracing::debug!(view_id, "click was not handled");
        }
        Ok(())
    }

    /// Forgets the applied state and asks the producer for a full apply.
    /// Repeated requests before the next successful apply are coalesced.
    pub fn request_resync(&mut self, reason: &str) {
        if self
            .resync_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::info!(reason, "requesting resync");
        self.last_rev = None;
        self.announce();
    }

    fn enqueue_control_envelope(&self, envelope: HostEnvelope) {
        match self.outbound.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                let outbound = self.outbound.clone();
                thread::spawn(move || {
                    if outbound.send(envelope).is_err() {
                        tracing::debug!("outbound queue closed before control envelope was sent");
                    }
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("outbound queue closed, dropping control envelope");
            }
        }
    }
}

/// Serves one producer over stdin and stdout until stdin closes.
pub fn run(engine: Engine, config: &HostConfig, params: ApplyParams) -> io::Result<()> {
    let (outbound_tx, outbound_rx) = mpsc::sync_channel(config.outbound_queue_cap);
    let writer = thread::Builder::new()
        .name("remoteviews-writer".into())
        .spawn(move || protocol::writer_loop(&mut io::stdout().lock(), outbound_rx))?;

    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    thread::Builder::new()
        .name("remoteviews-reader".into())
        .spawn(move || {
            let read = protocol::reader_loop(&mut io::stdin().lock(), |envelope| {
                if inbound_tx.send(envelope).is_err() {
                    tracing::debug!("session ended, dropping envelope");
                }
            });
            if let Err(err) = read {
                tracing::error!(%err, "producer stream failed");
            }
        })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let mut session = HostSession::new(config.sid.clone(), engine, params, outbound_tx);
    tracing::info!(sid = %session.sid, "remote views host ready");
    session.announce();

    runtime.block_on(async {
        while let Some(inbound) = inbound_rx.recv().await {
            match inbound {
                Ok(envelope) => session.process(envelope).await,
                Err(err) => session.reject_frame(err),
            }
        }
    });
    drop(session);

    match writer.join() {
        Ok(result) => result,
        Err(_) => Err(io::Error::other("writer thread panicked")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use rstest::rstest;

    use super::*;
    use crate::test_support::{self, PACKAGE, ids};

    const SID: &str = "S1";

    fn session(cap: usize) -> (HostSession, Receiver<HostEnvelope>) {
        let (tx, rx) = mpsc::sync_channel(cap);
        (HostSession::new(SID, test_support::engine(), ApplyParams::default(), tx), rx)
    }

    fn payload(rv: &RemoteViews) -> String {
        let bytes = codec::encode(rv, WireForm::Structured, &test_support::resources()).expect("encode tree");
        STANDARD.encode(bytes)
    }

    fn apply(rev: u64, rv: &RemoteViews) -> ProducerEnvelope {
        ProducerEnvelope::Apply {
            sid: SID.to_string(),
            rev,
            form: WireForm::Structured,
            payload: payload(rv),
            available_size: None,
        }
    }

    fn reapply(rev: u64, rv: &RemoteViews) -> ProducerEnvelope {
        ProducerEnvelope::Reapply {
            sid: SID.to_string(),
            rev,
            form: WireForm::Structured,
            payload: payload(rv),
            available_size: None,
        }
    }

    fn card(title: &str) -> RemoteViews {
        let mut rv = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        rv.set_text_view_text(ids::TITLE, title).expect("title");
        rv
    }

    fn drain(rx: &Receiver<HostEnvelope>) -> Vec<HostEnvelope> {
        rx.try_iter().collect()
    }

    #[rstest]
    #[case(None, 7, true)]
    #[case(Some(3), 4, true)]
    #[case(Some(3), 3, false)]
    #[case(Some(3), 5, false)]
    #[case(Some(u64::MAX), 0, true)]
    fn apply_revisions(#[case] last: Option<u64>, #[case] rev: u64, #[case] accepted: bool) {
        assert_eq!(validate_apply_rev(last, rev).is_ok(), accepted);
    }

    #[test]
    fn reapply_needs_an_applied_tree() {
        assert!(matches!(validate_reapply_rev(None, 1), Err(HostError::ResyncRequired)));
        assert!(validate_reapply_rev(Some(1), 2).is_ok());
        assert!(matches!(
            validate_reapply_rev(Some(1), 4),
            Err(HostError::RevMismatch { last: Some(1), got: 4 })
        ));
    }

    #[rstest]
    #[case("decode_error", true)]
    #[case("frame_too_large", true)]
    #[case("invalid_envelope", true)]
    #[case("rev_mismatch", true)]
    #[case("patch_apply_error", true)]
    #[case("unknown_view", false)]
    #[case("render_error", false)]
    fn resync_codes(#[case] code: &str, #[case] resync: bool) {
        assert_eq!(should_resync_for_error(code), resync);
    }

    #[tokio::test]
    async fn apply_reports_root_and_revision() {
        let (mut session, rx) = session(8);
        session.process(apply(1, &card("hello"))).await;

        let sent = drain(&rx);
        assert!(matches!(
            sent.as_slice(),
            [HostEnvelope::Applied { rev: 1, root_view_id, .. }] if *root_view_id == ids::ROOT
        ));
        assert_eq!(session.last_rev(), Some(1));
        let root = session.root().expect("root");
        let tree = session.tree().read();
        assert!(tree.find_view_by_id(root, ids::TITLE).is_some());
    }

    #[tokio::test]
    async fn reapply_keeps_the_same_views() {
        let (mut session, rx) = session(8);
        session.process(apply(1, &card("one"))).await;
        let root = session.root().expect("root");
        let title = session.tree().read().find_view_by_id(root, ids::TITLE).expect("title");

        session.process(reapply(2, &card("two"))).await;
        assert_eq!(session.root(), Some(root));
        assert_eq!(session.tree().read().find_view_by_id(root, ids::TITLE), Some(title));
        assert_eq!(session.last_rev(), Some(2));
        assert_eq!(drain(&rx).len(), 2);
    }

    #[tokio::test]
    async fn reapply_with_new_layout_replaces_root() {
        let (mut session, rx) = session(8);
        session.process(apply(1, &card("one"))).await;
        let first = session.root().expect("root");

        session
            .process(reapply(2, &RemoteViews::new(PACKAGE, ids::WIDE_LAYOUT)))
            .await;
        let second = session.root().expect("root");
        assert_ne!(first, second);
        assert!(!session.tree().read().contains(first));
        assert_eq!(drain(&rx).len(), 2);
    }

    #[tokio::test]
    async fn async_preferring_trees_apply_in_background() {
        let (mut session, rx) = session(8);
        let mut rv = card("async");
        rv.set_image_view_uri(ids::ICON, "content://images/1").expect("uri");
        assert!(rv.prefers_async_apply());

        session.process(apply(1, &rv)).await;
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Applied { rev: 1, .. }]));
        assert!(session.root().is_some());
    }

    #[tokio::test]
    async fn revision_gap_requests_resync_once() {
        let (mut session, rx) = session(8);
        session.process(apply(1, &card("one"))).await;
        drain(&rx);

        session.process(reapply(5, &card("five"))).await;
        session.process(reapply(6, &card("six"))).await;
        let sent = drain(&rx);
        assert!(matches!(sent.as_slice(), [HostEnvelope::Ready { .. }]));
        assert_eq!(session.last_rev(), None);

        session.process(apply(9, &card("fresh"))).await;
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Applied { rev: 9, .. }]));
    }

    #[tokio::test]
    async fn reapply_before_apply_requests_resync() {
        let (mut session, rx) = session(8);
        session.process(reapply(1, &card("early"))).await;
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Ready { .. }]));
        assert!(session.root().is_none());
    }

    #[tokio::test]
    async fn garbage_payload_requests_resync() {
        let (mut session, rx) = session(8);
        session
            .process(ProducerEnvelope::Apply {
                sid: SID.to_string(),
                rev: 1,
                form: WireForm::Flat,
                payload: "not base64!".to_string(),
                available_size: None,
            })
            .await;
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Ready { .. }]));
    }

    #[tokio::test]
    async fn rejected_frames_request_resync_once() {
        let (mut session, rx) = session(8);
        session.process(apply(1, &card("one"))).await;
        drain(&rx);

        session.reject_frame(HostError::FrameTooLarge {
            len: protocol::PRODUCER_TO_HOST_CAP + 1,
            max: protocol::PRODUCER_TO_HOST_CAP,
        });
        let garbage = serde_json::from_slice::<ProducerEnvelope>(b"{}").expect_err("not an envelope");
        session.reject_frame(HostError::InvalidEnvelope(garbage));

        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Ready { .. }]));
        assert_eq!(session.last_rev(), None);
        assert!(session.root().is_some());

        session.process(apply(4, &card("fresh"))).await;
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Applied { rev: 4, .. }]));
    }

    #[tokio::test]
    async fn frames_read_off_the_wire_reach_the_session_as_resyncs() {
        let mut input = Vec::new();
        protocol::write_frame(&mut input, b"not json", protocol::PRODUCER_TO_HOST_CAP).expect("frame");
        let mut inbound = Vec::new();
        protocol::reader_loop(&mut io::Cursor::new(input), |envelope| inbound.push(envelope)).expect("reader");

        let (mut session, rx) = session(8);
        for envelope in inbound {
            match envelope {
                Ok(envelope) => panic!("unexpected envelope {envelope:?}"),
                Err(err) => session.reject_frame(err),
            }
        }
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Ready { .. }]));
    }

    #[tokio::test]
    async fn producer_errors_follow_resync_codes() {
        let (mut session, rx) = session(8);
        let error = |code: &str| ProducerEnvelope::Error {
            sid: SID.to_string(),
            rev: None,
            code: code.to_string(),
            message: "boom".to_string(),
        };

        session.process(error("render_error")).await;
        assert!(drain(&rx).is_empty());
        session.process(error("decode_error")).await;
        assert!(matches!(drain(&rx).as_slice(), [HostEnvelope::Ready { .. }]));
    }

    #[tokio::test]
    async fn clicks_are_forwarded_as_intents() {
        let (mut session, rx) = session(8);
        let pending = PendingIntent::new(PACKAGE, 3, Intent::new("com.example.OPEN"));
        let mut rv = card("tap me");
        rv.set_on_click_pending_intent(ids::TITLE, pending.clone()).expect("click");
        session.process(apply(1, &rv)).await;
        drain(&rx);

        session
            .process(ProducerEnvelope::Interact {
                sid: SID.to_string(),
                view_id: ids::TITLE,
            })
            .await;
        match drain(&rx).as_slice() {
            [HostEnvelope::Intent { view_id, pending: sent, fill_in, .. }] => {
                assert_eq!(*view_id, ids::TITLE);
                assert_eq!(sent, &pending);
                assert_eq!(fill_in, &None);
            }
            other => panic!("expected one intent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn envelopes_for_other_sessions_are_ignored() {
        let (mut session, rx) = session(8);
        session
            .process(ProducerEnvelope::Interact {
                sid: "S2".to_string(),
                view_id: ids::TITLE,
            })
            .await;
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn forwarder_counts_drops_when_queue_is_full() {
        let (tx, rx) = mpsc::sync_channel(1);
        let forwarder = IntentForwarder::new(SID, tx);
        let pending = PendingIntent::new(PACKAGE, 0, Intent::new("com.example.OPEN"));

        assert!(forwarder.on_interaction(1, &pending, None));
        assert!(!forwarder.on_interaction(2, &pending, None));
        assert!(!forwarder.on_interaction(3, &pending, None));
        assert_eq!(forwarder.dropped(), 2);

        assert!(matches!(rx.try_recv(), Ok(HostEnvelope::Intent { id: 1, view_id: 1, .. })));
    }
}
