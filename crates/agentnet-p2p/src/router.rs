use std::sync::Arc;
use std::time::Duration;

use agentnet_core::constants::ANNOUNCE_TOPIC;
use agentnet_core::types::{now_millis, AgentId};
use agentnet_core::{Envelope, MessageKind};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::announce::AnnouncementService;
use crate::config::NetConfig;
use crate::conversation::{ConversationLog, ConversationTurn};
use crate::dedup::DeliveryDedup;
use crate::ledger::{PendingQuestion, QuestionLedger};
use crate::message::InboundMessage;
use crate::outbox::Outbox;
use crate::service::{ConversationContext, Responder, TokenTransfer};

/// Dispatches verified inbound envelopes by kind.
///
/// [`MessageRouter::admit`] runs synchronously in the event loop; everything
/// after it runs in a task per envelope.
pub struct MessageRouter {
    outbox: Outbox,
    announcer: Arc<AnnouncementService>,
    dedup: DeliveryDedup,
    ledger: QuestionLedger,
    conversations: ConversationLog,
    responder: Arc<dyn Responder>,
    treasury: Arc<dyn TokenTransfer>,
    call_timeout: Duration,
    reply_to_broadcasts: bool,
    publish_receipts: bool,
}

impl MessageRouter {
    pub fn new(
        outbox: Outbox,
        announcer: Arc<AnnouncementService>,
        responder: Arc<dyn Responder>,
        treasury: Arc<dyn TokenTransfer>,
        config: &NetConfig,
    ) -> Self {
        Self {
            outbox,
            announcer,
            dedup: DeliveryDedup::new(config.dedup_ttl(), config.dedup_capacity),
            ledger: QuestionLedger::new(config.question_ttl()),
            conversations: ConversationLog::new(config.dedup_ttl()),
            responder,
            treasury,
            call_timeout: config.operation_timeout(),
            reply_to_broadcasts: config.reply_to_broadcasts,
            publish_receipts: config.publish_receipts,
        }
    }

    pub fn ledger(&self) -> &QuestionLedger {
        &self.ledger
    }

    pub fn conversations(&self) -> &ConversationLog {
        &self.conversations
    }

    pub fn dedup(&self) -> &DeliveryDedup {
        &self.dedup
    }

    fn local(&self) -> &AgentId {
        self.outbox.codec().agent_id()
    }

    /// Decode, verify and deduplicate one inbound message.
    ///
    /// Returns the envelope only the first time a valid id is seen. Nothing
    /// is marked for envelopes that fail verification.
    pub fn admit(&self, message: &InboundMessage) -> Option<Envelope> {
        let envelope = match self.outbox.codec().open(&message.data) {
            Ok(env) => env,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "discarding invalid envelope");
                return None;
            }
        };
        if message.topic == ANNOUNCE_TOPIC && envelope.kind != MessageKind::Announcement {
            warn!(
                id = %envelope.message_id,
                kind = %envelope.kind,
                "discarding non-announcement on announcement topic"
            );
            return None;
        }
        if self.dedup.check_and_mark(&envelope.message_id) {
            debug!(id = %envelope.message_id, "duplicate envelope");
            return None;
        }
        Some(envelope)
    }

    /// Handle an admitted envelope. Never fails; every outcome is logged.
    pub async fn dispatch(self: Arc<Self>, envelope: Envelope) {
        if &envelope.from_agent_id == self.local() {
            debug!(id = %envelope.message_id, kind = %envelope.kind, "ignoring self-authored envelope");
            return;
        }
        if let Some(to) = &envelope.to_agent_id {
            if to != self.local() {
                debug!(id = %envelope.message_id, to = %to.short(), "envelope addressed to another agent");
                return;
            }
        }

        match envelope.kind {
            MessageKind::Announcement => self.announcer.handle(&envelope).await,
            MessageKind::Question => self.on_question(envelope).await,
            MessageKind::Answer => self.on_answer(envelope).await,
            MessageKind::Broadcast => self.on_broadcast(envelope).await,
        }
    }

    async fn on_question(&self, question: Envelope) {
        let conversation = question.conversation_key();
        self.conversations
            .record(&conversation, ConversationTurn::from(&question));

        let Some(reply) = self.respond(&question, &conversation).await else {
            return;
        };
        let draft = Envelope::draft(MessageKind::Answer, self.local().clone(), reply)
            .to(question.from_agent_id.clone())
            .replying_to(question.message_id.clone())
            .in_conversation(conversation.clone());
        self.publish_reply(draft, &conversation).await;
    }

    async fn on_broadcast(&self, broadcast: Envelope) {
        let conversation = broadcast.conversation_key();
        self.conversations
            .record(&conversation, ConversationTurn::from(&broadcast));

        if self.is_receipt(&broadcast, &conversation) {
            info!(
                id = %broadcast.message_id,
                from = %broadcast.from_agent_id.short(),
                content = %broadcast.content,
                "reward receipt received"
            );
            return;
        }

        let Some(reply) = self.respond(&broadcast, &conversation).await else {
            return;
        };
        // Replies are never answered automatically, so two agents that both
        // reply to broadcasts exchange at most one round.
        if !self.reply_to_broadcasts || broadcast.reply_to.is_some() {
            debug!(id = %broadcast.message_id, "broadcast handled without reply");
            return;
        }
        let draft = Envelope::draft(MessageKind::Broadcast, self.local().clone(), reply)
            .to(broadcast.from_agent_id.clone())
            .replying_to(broadcast.message_id.clone())
            .in_conversation(conversation.clone());
        self.publish_reply(draft, &conversation).await;
    }

    /// A broadcast replying to an answer we authored in this conversation.
    fn is_receipt(&self, broadcast: &Envelope, conversation: &str) -> bool {
        let Some(reply_to) = broadcast.reply_to.as_ref() else {
            return false;
        };
        self.conversations.context(conversation).iter().any(|turn| {
            &turn.message_id == reply_to
                && turn.kind == MessageKind::Answer
                && &turn.author == self.local()
        })
    }

    async fn on_answer(&self, answer: Envelope) {
        let conversation = answer.conversation_key();
        self.conversations
            .record(&conversation, ConversationTurn::from(&answer));

        let Some(reply_to) = answer.reply_to.as_ref() else {
            warn!(id = %answer.message_id, from = %answer.from_agent_id.short(), "answer without replyTo");
            return;
        };
        let Some(question) = self.ledger.resolve(reply_to) else {
            debug!(id = %answer.message_id, %reply_to, "answer for unknown or settled question");
            return;
        };
        info!(
            question = %question.message_id,
            answerer = %answer.from_agent_id.short(),
            "question answered"
        );
        if question.requires_reward() {
            self.settle(&question, &answer, &conversation).await;
        }
    }

    /// Pay the answerer. The question stays consumed whatever happens here.
    async fn settle(&self, question: &PendingQuestion, answer: &Envelope, conversation: &str) {
        let answerer = &answer.from_agent_id;
        let amount = question.reward_amount;
        let tx = match tokio::time::timeout(self.call_timeout, self.treasury.transfer(answerer, amount)).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(e)) => {
                error!(question = %question.message_id, to = %answerer.short(), amount, error = %e, "reward transfer failed");
                return;
            }
            Err(_) => {
                error!(
                    question = %question.message_id,
                    to = %answerer.short(),
                    amount,
                    timeout = ?self.call_timeout,
                    "reward transfer timed out"
                );
                return;
            }
        };
        info!(question = %question.message_id, to = %answerer.short(), amount, %tx, "reward paid");

        if self.publish_receipts {
            let receipt = Envelope::draft(
                MessageKind::Broadcast,
                self.local().clone(),
                format!("paid {amount} for answer {}; transaction {tx}", answer.message_id),
            )
            .to(answerer.clone())
            .replying_to(answer.message_id.clone())
            .in_conversation(conversation.to_string());
            self.publish_reply(receipt, conversation).await;
        }
    }

    async fn respond(&self, envelope: &Envelope, conversation: &str) -> Option<String> {
        let context = ConversationContext {
            conversation_id: conversation.to_string(),
            peer: envelope.from_agent_id.clone(),
            history: self.conversations.context(conversation),
        };
        match tokio::time::timeout(self.call_timeout, self.responder.respond(&envelope.content, &context)).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!(id = %envelope.message_id, kind = %envelope.kind, error = %e, "responder failed");
                None
            }
            Err(_) => {
                warn!(id = %envelope.message_id, kind = %envelope.kind, timeout = ?self.call_timeout, "responder timed out");
                None
            }
        }
    }

    async fn publish_reply(&self, draft: Envelope, conversation: &str) {
        if !self.outbox.is_live() {
            debug!(kind = %draft.kind, "session closed; dropping reply");
            return;
        }
        match self.outbox.send(draft).await {
            Ok(sent) => self
                .conversations
                .record(conversation, ConversationTurn::from(&sent)),
            Err(e) => warn!(error = %e, "failed to publish reply"),
        }
    }

    /// Record an envelope we originated so later replies see it as context.
    pub fn record_outbound(&self, sent: &Envelope) {
        if sent.kind != MessageKind::Announcement {
            self.conversations
                .record(&sent.conversation_key(), ConversationTurn::from(sent));
        }
    }

    /// Periodic housekeeping: dedup TTL, question TTL, idle conversations.
    pub fn sweep(&self, now: Instant) {
        let purged = self.dedup.sweep(now);
        let expired = self.ledger.expire(now_millis());
        let idle = self.conversations.sweep(now);
        for q in &expired {
            info!(question = %q.message_id, reward = q.reward_amount, "question expired unanswered");
        }
        debug!(purged, expired = expired.len(), idle, "sweep complete");
    }

    /// Forget all session state.
    pub fn clear(&self) {
        let discarded = self.ledger.clear();
        if discarded > 0 {
            info!(discarded, "discarding pending questions");
        }
        self.dedup.clear();
        self.conversations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageCodec;
    use crate::memory::MemoryHub;
    use crate::peers::PeerDirectory;
    use crate::transport::Transport;
    use agentnet_core::constants::MESSAGE_TOPIC;
    use agentnet_core::types::MessageId;
    use agentnet_crypto::KeyPair;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
        contexts: Mutex<Vec<usize>>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl Responder for Echo {
        async fn respond(&self, text: &str, ctx: &ConversationContext) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().unwrap().push(ctx.history.len());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("model unavailable");
            }
            Ok(format!("re: {text}"))
        }
    }

    #[derive(Default)]
    struct Treasury {
        calls: AtomicUsize,
        paid: Mutex<Vec<(AgentId, u64)>>,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl TokenTransfer for Treasury {
        async fn transfer(&self, to: &AgentId, amount: u64) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                anyhow::bail!("insufficient funds");
            }
            self.paid.lock().unwrap().push((to.clone(), amount));
            Ok("tx-1".into())
        }
    }

    struct Rig {
        hub: MemoryHub,
        router: Arc<MessageRouter>,
        echo: Arc<Echo>,
        treasury: Arc<Treasury>,
        local: AgentId,
    }

    async fn rig(config: NetConfig, treasury: Treasury) -> Rig {
        rig_with(config, Echo::default(), treasury).await
    }

    async fn rig_with(config: NetConfig, echo: Echo, treasury: Treasury) -> Rig {
        let hub = MemoryHub::new();
        let transport = Arc::new(hub.transport("local"));
        transport.listen(1).await.unwrap();
        let codec = MessageCodec::new(Arc::new(KeyPair::generate()));
        let local = codec.agent_id().clone();
        let outbox = Outbox::new(codec, transport);
        outbox.open();
        let announcer = Arc::new(AnnouncementService::new(
            outbox.clone(),
            Arc::new(PeerDirectory::new()),
            &config,
        ));
        let echo = Arc::new(echo);
        let treasury = Arc::new(treasury);
        let router = Arc::new(MessageRouter::new(
            outbox,
            announcer,
            echo.clone(),
            treasury.clone(),
            &config,
        ));
        Rig { hub, router, echo, treasury, local }
    }

    fn wire(env: &Envelope) -> InboundMessage {
        InboundMessage::new(MESSAGE_TOPIC, env.to_bytes().unwrap())
    }

    fn question_from(peer: &MessageCodec, text: &str) -> Envelope {
        peer.seal(Envelope::draft(MessageKind::Question, peer.agent_id().clone(), text))
            .unwrap()
    }

    fn answer_to(peer: &MessageCodec, asker: &AgentId, question: &MessageId) -> Envelope {
        peer.seal(
            Envelope::draft(MessageKind::Answer, peer.agent_id().clone(), "a")
                .to(asker.clone())
                .replying_to(question.clone()),
        )
        .unwrap()
    }

    async fn deliver(r: &Rig, env: &Envelope) {
        let env = r.router.admit(&wire(env)).unwrap();
        r.router.clone().dispatch(env).await;
    }

    #[tokio::test]
    async fn question_gets_threaded_answer() {
        let r = rig(NetConfig::default(), Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let q = peer
            .seal(Envelope::draft(MessageKind::Question, peer.agent_id().clone(), "why?"))
            .unwrap();

        let env = r.router.admit(&wire(&q)).unwrap();
        r.router.clone().dispatch(env).await;

        let published = r.hub.published();
        assert_eq!(published.len(), 1);
        let answer = Envelope::from_bytes(&published[0].data).unwrap();
        assert_eq!(answer.kind, MessageKind::Answer);
        assert_eq!(answer.reply_to.as_ref(), Some(&q.message_id));
        assert_eq!(answer.to_agent_id.as_ref(), Some(peer.agent_id()));
        assert_eq!(answer.conversation_id.as_deref(), Some(q.message_id.as_str()));
        assert_eq!(answer.content, "re: why?");
        assert_eq!(r.router.conversations().context(q.message_id.as_str()).len(), 2);
    }

    #[tokio::test]
    async fn tampered_envelope_is_never_admitted() {
        let r = rig(NetConfig::default(), Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let mut q = peer
            .seal(Envelope::draft(MessageKind::Question, peer.agent_id().clone(), "original"))
            .unwrap();
        q.content = "tampered".into();

        assert!(r.router.admit(&wire(&q)).is_none());
        assert!(r.router.dedup().is_empty());
        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answers_to_foreign_question_pay_nothing() {
        let r = rig(NetConfig::default(), Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let a = peer
            .seal(
                Envelope::draft(MessageKind::Answer, peer.agent_id().clone(), "42")
                    .to(r.local.clone())
                    .replying_to("someone-elses".into()),
            )
            .unwrap();
        let env = r.router.admit(&wire(&a)).unwrap();
        r.router.clone().dispatch(env).await;
        assert!(r.treasury.paid.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_transfer_still_consumes_question() {
        let r = rig(NetConfig::default(), Treasury { fail: true, ..Default::default() }).await;
        let id = r.router.ledger().ask(&r.local, "q", 10, now_millis());
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let a = peer
            .seal(
                Envelope::draft(MessageKind::Answer, peer.agent_id().clone(), "a")
                    .to(r.local.clone())
                    .replying_to(id.clone()),
            )
            .unwrap();
        let env = r.router.admit(&wire(&a)).unwrap();
        r.router.clone().dispatch(env).await;
        assert!(r.router.ledger().get(&id).is_none());
        assert!(r.treasury.paid.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn receipt_follows_successful_reward() {
        let config = NetConfig { publish_receipts: true, ..NetConfig::default() };
        let r = rig(config, Treasury::default()).await;
        let id = r.router.ledger().ask(&r.local, "q", 7, now_millis());
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let a = peer
            .seal(
                Envelope::draft(MessageKind::Answer, peer.agent_id().clone(), "a")
                    .to(r.local.clone())
                    .replying_to(id),
            )
            .unwrap();
        let env = r.router.admit(&wire(&a)).unwrap();
        r.router.clone().dispatch(env).await;

        assert_eq!(r.treasury.paid.lock().unwrap().as_slice(), &[(peer.agent_id().clone(), 7)]);
        let receipt = Envelope::from_bytes(&r.hub.published()[0].data).unwrap();
        assert_eq!(receipt.kind, MessageKind::Broadcast);
        assert_eq!(receipt.to_agent_id.as_ref(), Some(peer.agent_id()));
        assert!(receipt.content.contains("tx-1"));
    }

    #[tokio::test]
    async fn broadcasts_reach_responder_but_reply_only_when_enabled() {
        let r = rig(NetConfig::default(), Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let b = peer
            .seal(Envelope::draft(MessageKind::Broadcast, peer.agent_id().clone(), "hello all"))
            .unwrap();
        let env = r.router.admit(&wire(&b)).unwrap();
        r.router.clone().dispatch(env).await;
        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 1);
        assert!(r.hub.published().is_empty());
    }

    #[tokio::test]
    async fn envelopes_for_other_agents_are_skipped() {
        let r = rig(NetConfig::default(), Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let elsewhere = AgentId::from_key_bytes(&[3u8; 32]);
        let q = peer
            .seal(Envelope::draft(MessageKind::Question, peer.agent_id().clone(), "psst").to(elsewhere))
            .unwrap();
        let env = r.router.admit(&wire(&q)).unwrap();
        r.router.clone().dispatch(env).await;
        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn question_on_announcement_topic_is_rejected() {
        let r = rig(NetConfig::default(), Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let q = peer
            .seal(Envelope::draft(MessageKind::Question, peer.agent_id().clone(), "?"))
            .unwrap();
        let msg = InboundMessage::new(ANNOUNCE_TOPIC, q.to_bytes().unwrap());
        assert!(r.router.admit(&msg).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn responder_failure_publishes_no_answer() {
        let echo = Echo { fail: true, ..Default::default() };
        let r = rig_with(NetConfig::default(), echo, Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let q = question_from(&peer, "anyone?");

        deliver(&r, &q).await;

        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 1);
        assert!(r.hub.published().is_empty());
        assert_eq!(r.router.conversations().context(q.message_id.as_str()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_responder_times_out_without_retry() {
        let config = NetConfig::default();
        let echo = Echo { delay: config.operation_timeout() + Duration::from_secs(1), ..Default::default() };
        let r = rig_with(config.clone(), echo, Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));

        let started = Instant::now();
        deliver(&r, &question_from(&peer, "take your time")).await;
        assert_eq!(started.elapsed(), config.operation_timeout());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 1);
        assert!(r.hub.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_transfer_times_out_and_consumes_question() {
        let config = NetConfig { publish_receipts: true, ..NetConfig::default() };
        let r = rig(config.clone(), Treasury { hang: true, ..Default::default() }).await;
        let id = r.router.ledger().ask(&r.local, "q", 10, now_millis());
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));

        let started = Instant::now();
        deliver(&r, &answer_to(&peer, &r.local, &id)).await;
        assert_eq!(started.elapsed(), config.operation_timeout());

        // A second answer finds nothing left to pay.
        let late = MessageCodec::new(Arc::new(KeyPair::generate()));
        deliver(&r, &answer_to(&late, &r.local, &id)).await;

        assert!(r.router.ledger().get(&id).is_none());
        assert_eq!(r.treasury.calls.load(Ordering::SeqCst), 1);
        assert!(r.hub.published().is_empty());
    }

    #[tokio::test]
    async fn replies_to_broadcasts_are_not_answered() {
        let config = NetConfig { reply_to_broadcasts: true, ..NetConfig::default() };
        let r = rig(config, Treasury::default()).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));

        let opener = peer
            .seal(Envelope::draft(MessageKind::Broadcast, peer.agent_id().clone(), "hello all"))
            .unwrap();
        deliver(&r, &opener).await;
        assert_eq!(r.hub.published().len(), 1);

        let follow_up = peer
            .seal(
                Envelope::draft(MessageKind::Broadcast, peer.agent_id().clone(), "hello back")
                    .to(r.local.clone())
                    .replying_to(opener.message_id.clone())
                    .in_conversation(opener.message_id.to_string()),
            )
            .unwrap();
        deliver(&r, &follow_up).await;

        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 2);
        assert_eq!(r.hub.published().len(), 1);
    }

    #[tokio::test]
    async fn receipts_are_logged_not_answered() {
        let config = NetConfig { reply_to_broadcasts: true, ..NetConfig::default() };
        let r = rig(config, Treasury::default()).await;
        let asker = MessageCodec::new(Arc::new(KeyPair::generate()));
        let q = question_from(&asker, "paid question");
        deliver(&r, &q).await;
        let answer = Envelope::from_bytes(&r.hub.published()[0].data).unwrap();

        let receipt = asker
            .seal(
                Envelope::draft(MessageKind::Broadcast, asker.agent_id().clone(), "paid 5; transaction tx-9")
                    .to(r.local.clone())
                    .replying_to(answer.message_id.clone())
                    .in_conversation(q.message_id.to_string()),
            )
            .unwrap();
        deliver(&r, &receipt).await;

        assert_eq!(r.echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.hub.published().len(), 1);
        assert_eq!(r.router.conversations().context(q.message_id.as_str()).len(), 3);
    }
}
