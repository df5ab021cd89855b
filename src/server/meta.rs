//! Обработчики мета-каналов.
//!
//! Каждый обработчик строит ровно один ответ. Протокольные ошибки
//! записываются в поле `error`, ничего не пробрасывается наружу.

use bayeux_error::ProtocolError;
use tracing::{debug, info};

use super::{engine_failure, Server};
use crate::protocol::{
    channel, make_response,
    message::{CLIENT_ID, CONNECTION_TYPE, ERROR, SUBSCRIPTION, SUPPORTED_CONNECTION_TYPES, VERSION},
    Message, BAYEUX_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionOp {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl Server {
    pub(super) async fn handshake(
        &self,
        message: &Message,
        local: bool,
    ) -> Message {
        let mut response = make_response(message);
        response.insert(VERSION, BAYEUX_VERSION);

        if !message.has(VERSION) {
            response.set_error(ProtocolError::parameter_missing(VERSION));
        }

        if !local {
            response.insert(SUPPORTED_CONNECTION_TYPES, self.supported_connection_types.clone());

            match message.supported_connection_types() {
                Some(client_types) => {
                    let common = client_types
                        .iter()
                        .any(|t| self.supported_connection_types.contains(t));
                    if !common {
                        response.set_error(ProtocolError::connection_type_mismatch(client_types.as_slice()));
                    }
                }
                None => {
                    response.set_error(ProtocolError::parameter_missing(SUPPORTED_CONNECTION_TYPES))
                }
            }
        }

        if !response.update_successful() {
            response.remove(CLIENT_ID);
            debug!(error = response.error(), "Handshake rejected");
            return response;
        }

        match self.engine.create_client().await {
            Ok(client_id) => {
                debug!(client_id = %client_id, "Handshake accepted");
                response.insert(CLIENT_ID, client_id);
            }
            Err(err) => {
                response.remove(CLIENT_ID);
                response.set_error(engine_failure(err, "create_client"));
                response.update_successful();
            }
        }
        response
    }

    pub(super) async fn connect(
        &self,
        message: &Message,
    ) -> Message {
        let mut response = make_response(message);
        self.check_client(message, &mut response).await;

        if !message.has(CONNECTION_TYPE) {
            response.set_error(ProtocolError::parameter_missing(CONNECTION_TYPE));
        }

        if response.update_successful() {
            if let Some(client_id) = message.client_id() {
                if let Err(err) = self.engine.ping(client_id).await {
                    response.set_error(engine_failure(err, "ping"));
                    response.update_successful();
                }
            }
        }

        if response.successful() != Some(true) {
            response.remove(CLIENT_ID);
        }
        response
    }

    pub(super) async fn disconnect(
        &self,
        message: &Message,
    ) -> Message {
        let mut response = make_response(message);
        self.check_client(message, &mut response).await;

        if response.update_successful() {
            if let Some(client_id) = message.client_id() {
                match self.engine.destroy_client(client_id).await {
                    Ok(()) => info!(client_id, "Client disconnected"),
                    Err(err) => {
                        response.set_error(engine_failure(err, "destroy_client"));
                        response.update_successful();
                    }
                }
            }
        }

        if response.successful() != Some(true) {
            response.remove(CLIENT_ID);
        }
        response
    }

    pub(super) async fn subscribe(
        &self,
        message: &Message,
        local: bool,
    ) -> Message {
        self.update_subscriptions(message, local, SubscriptionOp::Subscribe)
            .await
    }

    pub(super) async fn unsubscribe(
        &self,
        message: &Message,
        local: bool,
    ) -> Message {
        self.update_subscriptions(message, local, SubscriptionOp::Unsubscribe)
            .await
    }

    /// Общая логика subscribe/unsubscribe.
    ///
    /// Сначала проверяются все каналы списка (при нескольких ошибках
    /// остаётся последняя), и только при полном отсутствии ошибок Engine
    /// получает изменения: список применяется целиком или не применяется.
    async fn update_subscriptions(
        &self,
        message: &Message,
        local: bool,
        op: SubscriptionOp,
    ) -> Message {
        let mut response = make_response(message);
        self.check_client(message, &mut response).await;

        if !message.has(SUBSCRIPTION) {
            response.set_error(ProtocolError::parameter_missing(SUBSCRIPTION));
        }

        let channels = message.subscription();
        response.insert(SUBSCRIPTION, channels.clone());

        if !response.is_set(ERROR) {
            for name in &channels {
                if !local && !channel::is_subscribable(name) {
                    response.set_error(ProtocolError::channel_forbidden(name));
                }
                if !channel::is_valid(name) {
                    response.set_error(ProtocolError::channel_invalid(name));
                }
            }
        }

        if !response.is_set(ERROR) {
            if let Some(client_id) = message.client_id() {
                for name in &channels {
                    let applied = match op {
                        SubscriptionOp::Subscribe => self.engine.subscribe(client_id, name).await,
                        SubscriptionOp::Unsubscribe => {
                            self.engine.unsubscribe(client_id, name).await
                        }
                    };
                    if let Err(err) = applied {
                        debug!(client_id, channel = %name, ?op, "Subscription change rejected");
                        response.set_error(engine_failure(err, op.as_str()));
                        break;
                    }
                }
                debug!(client_id, ?op, channels = channels.len(), "Subscriptions updated");
            }
        }

        if !response.update_successful() {
            response.remove(CLIENT_ID);
        }
        response
    }

    /// Проверяет `clientId`: сначала существование в Engine, затем
    /// наличие поля, так что отсутствующий `clientId` перекрывает
    /// «неизвестного клиента».
    async fn check_client(
        &self,
        message: &Message,
        response: &mut Message,
    ) {
        let client_id = message.client_id();
        let exists = match client_id {
            Some(id) => self.engine.client_exists(id).await,
            None => Ok(false),
        };

        match exists {
            Ok(true) => {}
            Ok(false) => {
                response.set_error(ProtocolError::client_unknown(client_id.unwrap_or_default()))
            }
            Err(err) => response.set_error(engine_failure(err, "client_exists")),
        }

        if client_id.is_none() {
            response.set_error(ProtocolError::parameter_missing(CLIENT_ID));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{config::Settings, engine::Engine, engine::InMemoryEngine};

    fn server() -> (Server, Arc<InMemoryEngine>) {
        let engine = Arc::new(InMemoryEngine::default());
        let settings = Settings {
            supported_connection_types: vec!["long-polling".into(), "websocket".into()],
            ..Settings::default()
        };
        (Server::new(engine.clone(), &settings), engine)
    }

    fn msg(value: serde_json::Value) -> Message {
        Message::try_from(value).unwrap()
    }

    /// Тест проверяет ошибки рукопожатия и отсутствие `clientId` в них.
    #[tokio::test]
    async fn test_handshake_errors() {
        let (server, _) = server();

        let no_version = server
            .handshake(
                &msg(json!({"channel": "/meta/handshake", "supportedConnectionTypes": ["long-polling"]})),
                false,
            )
            .await;
        assert_eq!(no_version.error(), Some("402:version:Missing required parameter"));
        assert!(no_version.client_id().is_none());

        let no_types = server
            .handshake(&msg(json!({"channel": "/meta/handshake", "version": "1.0"})), false)
            .await;
        assert_eq!(
            no_types.error(),
            Some("402:supportedConnectionTypes:Missing required parameter")
        );

        let mismatch = server
            .handshake(
                &msg(json!({
                    "channel": "/meta/handshake",
                    "version": "1.0",
                    "clientId": "forged",
                    "supportedConnectionTypes": ["flash", "iframe"]
                })),
                false,
            )
            .await;
        assert_eq!(
            mismatch.error(),
            Some("301:flash,iframe:Connection types not supported")
        );
        assert_eq!(mismatch.successful(), Some(false));
        assert!(mismatch.client_id().is_none());
    }

    /// Тест проверяет локальное рукопожатие без согласования транспорта.
    #[tokio::test]
    async fn test_local_handshake_skips_connection_types() {
        let (server, engine) = server();
        let response = server
            .handshake(&msg(json!({"channel": "/meta/handshake", "version": "1.0"})), true)
            .await;
        assert_eq!(response.successful(), Some(true));
        assert!(response.get(SUPPORTED_CONNECTION_TYPES).is_none());
        let id = response.client_id().unwrap();
        assert!(engine.client_exists(id).await.unwrap());
    }

    /// Тест проверяет порядок ошибок connect: отсутствующий `connectionType`
    /// перекрывает остальные.
    #[tokio::test]
    async fn test_connect_error_precedence() {
        let (server, _) = server();

        let unknown = server
            .connect(&msg(json!({"channel": "/meta/connect", "clientId": "ghost", "connectionType": "long-polling"})))
            .await;
        assert_eq!(unknown.error(), Some("401:ghost:Unknown client"));
        assert!(unknown.client_id().is_none());

        let missing_id = server
            .connect(&msg(json!({"channel": "/meta/connect", "connectionType": "long-polling"})))
            .await;
        assert_eq!(missing_id.error(), Some("402:clientId:Missing required parameter"));

        let missing_type = server
            .connect(&msg(json!({"channel": "/meta/connect", "clientId": "ghost"})))
            .await;
        assert_eq!(
            missing_type.error(),
            Some("402:connectionType:Missing required parameter")
        );
    }

    /// Тест проверяет успешный connect: `clientId` сохраняется, Engine
    /// получает ping.
    #[tokio::test]
    async fn test_connect_success_keeps_client_id() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        let response = server
            .connect(&msg(json!({"channel": "/meta/connect", "clientId": id, "connectionType": "long-polling"})))
            .await;
        assert_eq!(response.successful(), Some(true));
        assert_eq!(response.client_id(), Some(id.as_str()));
    }

    /// Тест проверяет, что disconnect уничтожает клиента.
    #[tokio::test]
    async fn test_disconnect_destroys_client() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        let response = server
            .disconnect(&msg(json!({"channel": "/meta/disconnect", "clientId": id})))
            .await;
        assert_eq!(response.successful(), Some(true));
        assert!(!engine.client_exists(&id).await.unwrap());

        let again = server
            .disconnect(&msg(json!({"channel": "/meta/disconnect", "clientId": id})))
            .await;
        assert_eq!(again.successful(), Some(false));
        assert!(again.client_id().is_none());
    }

    /// Тест проверяет, что пустой список подписок успешен.
    #[tokio::test]
    async fn test_subscribe_empty_list() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        let response = server
            .subscribe(
                &msg(json!({"channel": "/meta/subscribe", "clientId": id, "subscription": []})),
                false,
            )
            .await;
        assert_eq!(response.successful(), Some(true));
        assert_eq!(response.get(SUBSCRIPTION), Some(&json!([])));
    }

    /// Тест проверяет, что ошибочный канал отменяет весь список.
    #[tokio::test]
    async fn test_subscribe_all_or_nothing() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        let response = server
            .subscribe(
                &msg(json!({
                    "channel": "/meta/subscribe",
                    "clientId": id,
                    "subscription": ["/valid", "/meta/secret"]
                })),
                false,
            )
            .await;
        assert_eq!(response.successful(), Some(false));
        assert_eq!(response.error(), Some("403:/meta/secret:Forbidden channel"));
        assert_eq!(response.get(SUBSCRIPTION), Some(&json!(["/valid", "/meta/secret"])));
        assert!(response.client_id().is_none());
        assert!(engine.subscribers("/valid").is_empty());
    }

    /// Тест проверяет, что при нескольких ошибках остаётся последняя, а
    /// некорректное имя перекрывает запрет.
    #[tokio::test]
    async fn test_subscribe_last_error_wins() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        let response = server
            .subscribe(
                &msg(json!({
                    "channel": "/meta/subscribe",
                    "clientId": id,
                    "subscription": ["/service/x", "bad channel"]
                })),
                false,
            )
            .await;
        assert_eq!(response.error(), Some("405:bad channel:Invalid channel"));
    }

    /// Тест проверяет, что локальный источник может подписаться на
    /// мета-каналы, но не на некорректные имена.
    #[tokio::test]
    async fn test_local_subscribe_bypasses_forbidden() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        let ok = server
            .subscribe(
                &msg(json!({"channel": "/meta/subscribe", "clientId": id, "subscription": "/meta/**"})),
                true,
            )
            .await;
        assert_eq!(ok.successful(), Some(true));
        assert_eq!(engine.subscribers("/meta/**"), vec![id.clone()]);

        let invalid = server
            .subscribe(
                &msg(json!({"channel": "/meta/subscribe", "clientId": id, "subscription": "nope"})),
                true,
            )
            .await;
        assert_eq!(invalid.error(), Some("405:nope:Invalid channel"));
    }

    /// Тест проверяет отписку и отсутствие параметра `subscription`.
    #[tokio::test]
    async fn test_unsubscribe() {
        let (server, engine) = server();
        let id = engine.create_client().await.unwrap();
        engine.subscribe(&id, "/chat").await.unwrap();

        let missing = server
            .unsubscribe(&msg(json!({"channel": "/meta/unsubscribe", "clientId": id})), false)
            .await;
        assert_eq!(
            missing.error(),
            Some("402:subscription:Missing required parameter")
        );
        assert_eq!(missing.get(SUBSCRIPTION), Some(&json!([])));
        assert_eq!(engine.subscribers("/chat"), vec![id.clone()]);

        let ok = server
            .unsubscribe(
                &msg(json!({"channel": "/meta/unsubscribe", "clientId": id, "subscription": "/chat"})),
                false,
            )
            .await;
        assert_eq!(ok.successful(), Some(true));
        assert!(engine.subscribers("/chat").is_empty());
    }

    /// Engine, у которого отказывают изменения подписок.
    struct BrokenSubscriptions(InMemoryEngine);

    #[async_trait::async_trait]
    impl Engine for BrokenSubscriptions {
        async fn create_client(&self) -> bayeux_error::EngineResult<String> {
            self.0.create_client().await
        }

        async fn client_exists(
            &self,
            client_id: &str,
        ) -> bayeux_error::EngineResult<bool> {
            self.0.client_exists(client_id).await
        }

        async fn ping(
            &self,
            client_id: &str,
        ) -> bayeux_error::EngineResult<()> {
            self.0.ping(client_id).await
        }

        async fn destroy_client(
            &self,
            client_id: &str,
        ) -> bayeux_error::EngineResult<()> {
            self.0.destroy_client(client_id).await
        }

        async fn subscribe(
            &self,
            _client_id: &str,
            _channel: &str,
        ) -> bayeux_error::EngineResult<()> {
            Err(bayeux_error::EngineError::Unavailable("backend down".into()))
        }

        async fn unsubscribe(
            &self,
            client_id: &str,
            _channel: &str,
        ) -> bayeux_error::EngineResult<()> {
            Err(bayeux_error::EngineError::UnknownClient(client_id.into()))
        }

        async fn publish(
            &self,
            message: Message,
        ) -> bayeux_error::EngineResult<()> {
            self.0.publish(message).await
        }

        fn events(&self) -> tokio::sync::broadcast::Receiver<crate::engine::EngineEvent> {
            self.0.events()
        }
    }

    /// Тест проверяет, что сбой Engine становится ошибкой `500` без
    /// подробностей, а неизвестный клиент остаётся `401`.
    #[tokio::test]
    async fn test_engine_failure_responses() {
        let engine = Arc::new(BrokenSubscriptions(InMemoryEngine::default()));
        let server = Server::new(engine.clone(), &Settings::default());
        let id = engine.create_client().await.unwrap();

        let subscribed = server
            .subscribe(
                &msg(json!({"channel": "/meta/subscribe", "clientId": id, "subscription": "/chat"})),
                false,
            )
            .await;
        assert_eq!(subscribed.successful(), Some(false));
        assert_eq!(subscribed.error(), Some("500:engine:Internal server error"));
        assert!(subscribed.client_id().is_none());

        let unsubscribed = server
            .unsubscribe(
                &msg(json!({"channel": "/meta/unsubscribe", "clientId": id, "subscription": "/chat"})),
                false,
            )
            .await;
        assert_eq!(unsubscribed.error(), Some(format!("401:{id}:Unknown client").as_str()));
    }
}
