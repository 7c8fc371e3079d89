//! Topic router - trie dispatcher from dot-delimited topics to handlers.
//!
//! `"chat.room.join"` is split into segments and stored one trie node per
//! segment. Matching is exact per segment and case-insensitive; there is no
//! prefix fallback. Registering a route also queue-subscribes the topic on
//! the hub so broker deliveries for it reach this process.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, Envelope};
use crate::ports::{Hub, HubError};

use super::Context;

/// Handler invoked for envelopes delivered on a routed topic.
///
/// Closures `Fn(Context) -> impl Future<Output = Result<(), DomainError>>`
/// implement this trait, so most routes are registered inline:
///
/// ```ignore
/// router.add_route("ping", |ctx: Context| async move {
///     ctx.json("pong", &"ok", &[]).await
/// }).await?;
/// ```
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handles one delivery. Errors are logged by the dispatcher.
    async fn handle(&self, ctx: Context) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
{
    async fn handle(&self, ctx: Context) -> Result<(), DomainError> {
        (self)(ctx).await
    }
}

/// Kind of a trie node. Only static segments are matched today; parameter
/// and wildcard segments are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Static,
    Param,
    Any,
}

struct Node {
    kind: NodeKind,
    children: HashMap<String, Node>,
    handler: Option<Arc<dyn RouteHandler>>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: HashMap::new(),
            handler: None,
        }
    }

    fn static_child(&self, segment: &str) -> Option<&Node> {
        self.children
            .get(segment)
            .filter(|node| node.kind == NodeKind::Static)
    }

    fn is_prunable(&self) -> bool {
        self.handler.is_none() && self.children.is_empty()
    }

    /// Detaches the handler at `segments`, pruning nodes left empty.
    fn remove(&mut self, segments: &[String]) -> Option<Arc<dyn RouteHandler>> {
        match segments.split_first() {
            None => self.handler.take(),
            Some((head, rest)) => {
                let child = self.children.get_mut(head)?;
                let removed = child.remove(rest);
                if child.is_prunable() {
                    self.children.remove(head);
                }
                removed
            }
        }
    }
}

fn segments(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Topic router bound to a hub.
pub struct Router {
    name: String,
    hub: Arc<dyn Hub>,
    root: RwLock<Node>,
}

impl Router {
    /// Creates a router and binds it to `hub`.
    pub fn new(name: impl Into<String>, hub: Arc<dyn Hub>) -> Arc<Self> {
        let router = Arc::new(Self {
            name: name.into(),
            hub: hub.clone(),
            root: RwLock::new(Node::new(NodeKind::Static)),
        });
        hub.set_router(Arc::downgrade(&router));
        router
    }

    /// Router name, used as the `source` of reply envelopes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hub this router publishes through.
    pub fn hub(&self) -> &Arc<dyn Hub> {
        &self.hub
    }

    /// Registers `handler` for `action` and subscribes the topic on the hub.
    ///
    /// # Panics
    ///
    /// Panics if `action` is empty.
    pub async fn add_route<H>(&self, action: &str, handler: H) -> Result<(), HubError>
    where
        H: RouteHandler + 'static,
    {
        self.add_handler(action, Arc::new(handler)).await
    }

    /// Same as [`Router::add_route`] for an already shared handler.
    pub async fn add_handler(
        &self,
        action: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), HubError> {
        assert!(!action.is_empty(), "router: action must not be empty");

        {
            let mut root = self.root.write();
            let mut node = &mut *root;
            for segment in segments(action) {
                node = node
                    .children
                    .entry(segment)
                    .or_insert_with(|| Node::new(NodeKind::Static));
            }
            node.handler = Some(handler);
        }

        tracing::debug!(route = %action, router = %self.name, "Route added");
        self.hub.queue_subscribe(action).await
    }

    /// Returns the handler registered for exactly `path`.
    pub fn find(&self, path: &str) -> Option<Arc<dyn RouteHandler>> {
        let root = self.root.read();
        let mut node = &*root;
        for segment in segments(path) {
            node = node.static_child(&segment)?;
        }
        node.handler.clone()
    }

    /// Detaches the handler for `action` and unsubscribes the topic.
    pub async fn remove_route(&self, action: &str) -> Result<(), HubError> {
        let removed = self.root.write().remove(&segments(action));
        if removed.is_none() {
            return Ok(());
        }

        tracing::debug!(route = %action, router = %self.name, "Route removed");
        self.hub.unsubscribe(action).await
    }

    /// Runs the handler for `topic` with `envelope`.
    ///
    /// Unknown topics are dropped; handler errors are logged.
    pub async fn dispatch(&self, topic: &str, envelope: Envelope) {
        let Some(handler) = self.find(topic) else {
            tracing::debug!(topic = %topic, "No route for topic");
            return;
        };

        let ctx = Context::new(self.hub.clone(), self.name.clone(), envelope);
        if let Err(e) = handler.handle(ctx).await {
            tracing::warn!(
                topic = %topic,
                handler = handler.name(),
                error = %e,
                "Route handler failed"
            );
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, Weak};

    /// Hub double that records subscription calls.
    #[derive(Default)]
    struct RecordingHub {
        router: Mutex<Option<Weak<Router>>>,
        subscribed: Mutex<Vec<String>>,
        unsubscribed: Mutex<Vec<String>>,
        fail_subscribe: bool,
    }

    #[async_trait]
    impl Hub for RecordingHub {
        fn router(&self) -> Option<Arc<Router>> {
            self.router.lock().unwrap().as_ref().and_then(Weak::upgrade)
        }

        fn set_router(&self, router: Weak<Router>) {
            *self.router.lock().unwrap() = Some(router);
        }

        async fn publish(&self, _topic: &str, _envelope: &Envelope) -> Result<(), HubError> {
            Ok(())
        }

        async fn queue_subscribe(&self, topic: &str) -> Result<(), HubError> {
            if self.fail_subscribe {
                return Err(HubError::Unavailable("broker down".into()));
            }
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), HubError> {
            self.unsubscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    struct Tagged(&'static str);

    #[async_trait]
    impl RouteHandler for Tagged {
        async fn handle(&self, _ctx: Context) -> Result<(), DomainError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn router_with_hub() -> (Arc<Router>, Arc<RecordingHub>) {
        let hub = Arc::new(RecordingHub::default());
        let router = Router::new("prelude", hub.clone());
        (router, hub)
    }

    #[test]
    fn new_router_binds_itself_to_hub() {
        let (router, hub) = router_with_hub();
        let bound = hub.router().expect("router bound");
        assert!(Arc::ptr_eq(&bound, &router));
        assert_eq!(router.name(), "prelude");
    }

    #[tokio::test]
    async fn find_returns_registered_handler() {
        let (router, hub) = router_with_hub();
        router.add_route("chat.room.join", Tagged("join")).await.unwrap();

        let handler = router.find("chat.room.join").expect("handler");
        assert_eq!(handler.name(), "join");
        assert_eq!(*hub.subscribed.lock().unwrap(), vec!["chat.room.join"]);
    }

    #[tokio::test]
    async fn find_is_case_insensitive() {
        let (router, _) = router_with_hub();
        router.add_route("Hello.World", Tagged("hw")).await.unwrap();

        assert!(router.find("hello.world").is_some());
        assert!(router.find("HELLO.WORLD").is_some());
    }

    #[tokio::test]
    async fn find_has_no_prefix_fallback() {
        let (router, _) = router_with_hub();
        router.add_route("a.b", Tagged("ab")).await.unwrap();

        assert!(router.find("a").is_none());
        assert!(router.find("a.b.c").is_none());
        assert!(router.find("unknown").is_none());
    }

    #[tokio::test]
    async fn later_registration_replaces_handler() {
        let (router, _) = router_with_hub();
        router.add_route("ping", Tagged("first")).await.unwrap();
        router.add_route("ping", Tagged("second")).await.unwrap();

        assert_eq!(router.find("ping").unwrap().name(), "second");
    }

    #[tokio::test]
    #[should_panic(expected = "action must not be empty")]
    async fn empty_action_panics() {
        let (router, _) = router_with_hub();
        let _ = router.add_route("", Tagged("root")).await;
    }

    #[tokio::test]
    async fn subscribe_failure_is_returned() {
        let hub = Arc::new(RecordingHub {
            fail_subscribe: true,
            ..Default::default()
        });
        let router = Router::new("prelude", hub);

        let result = router.add_route("ping", Tagged("p")).await;
        assert!(matches!(result, Err(HubError::Unavailable(_))));
    }

    #[tokio::test]
    async fn remove_route_prunes_and_unsubscribes() {
        let (router, hub) = router_with_hub();
        router.add_route("s.abc", Tagged("abc")).await.unwrap();
        router.add_route("s", Tagged("s")).await.unwrap();

        router.remove_route("s.abc").await.unwrap();

        assert!(router.find("s.abc").is_none());
        assert!(router.find("s").is_some());
        assert_eq!(*hub.unsubscribed.lock().unwrap(), vec!["s.abc"]);
        assert!(router.root.read().children["s"].children.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_route_is_noop() {
        let (router, hub) = router_with_hub();
        router.remove_route("never.added").await.unwrap();
        assert!(hub.unsubscribed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_runs_closure_handler() {
        let (router, _) = router_with_hub();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        router
            .add_route("count", move |ctx: Context| {
                let counter = counter.clone();
                async move {
                    assert_eq!(ctx.event_type(), "count");
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        router.dispatch("count", Envelope::new("count")).await;
        router.dispatch("missing", Envelope::new("missing")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_swallows_handler_errors() {
        let (router, _) = router_with_hub();
        router
            .add_route("fail", |_ctx: Context| async {
                Err(DomainError::new(ErrorCode::InternalError, "boom"))
            })
            .await
            .unwrap();

        router.dispatch("fail", Envelope::new("fail")).await;
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn topic() -> impl Strategy<Value = String> {
            "[a-z]{1,6}(\\.[a-z]{1,6}){0,3}"
        }

        proptest! {
            #[test]
            fn find_returns_last_registered_handler(
                routes in proptest::collection::vec((topic(), 0usize..4), 1..12),
                lookup in topic(),
            ) {
                const NAMES: [&str; 4] = ["h0", "h1", "h2", "h3"];
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let (router, _) = router_with_hub();

                let mut expected: HashMap<String, &'static str> = HashMap::new();
                rt.block_on(async {
                    for (topic, idx) in &routes {
                        router.add_route(topic, Tagged(NAMES[*idx])).await.unwrap();
                        expected.insert(topic.clone(), NAMES[*idx]);
                    }
                });

                for (topic, name) in &expected {
                    prop_assert_eq!(router.find(topic).map(|h| h.name()), Some(*name));
                }
                prop_assert_eq!(
                    router.find(&lookup).map(|h| h.name()),
                    expected.get(&lookup).copied()
                );
            }
        }
    }
}
