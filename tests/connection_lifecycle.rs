use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bayeux::{
    config::{ConnectionSettings, EngineSettings},
    Batch, ConnectOptions, ConnectionRegistry, Engine, InMemoryEngine, Message, Origin, Server,
    Settings,
};
use serde_json::json;

fn msg(value: serde_json::Value) -> Message {
    Message::try_from(value).expect("message must be an object")
}

async fn handshake(server: &Server) -> Result<String> {
    let replies = server
        .process(
            msg(json!({
                "channel": "/meta/handshake",
                "version": "1.0",
                "supportedConnectionTypes": ["long-polling"]
            })),
            Origin::remote(),
        )
        .await;
    Ok(replies[0]
        .client_id()
        .ok_or_else(|| anyhow::anyhow!("handshake failed"))?
        .to_string())
}

/// Тест проверяет идемпотентность реестра и новый экземпляр после
/// уничтожения.
#[tokio::test]
async fn test_registry_connection_identity() {
    let registry = ConnectionRegistry::default();
    let first = registry.connection("client");
    assert!(Arc::ptr_eq(&first, &registry.connection("client")));

    registry.destroy_connection(Some(&first));
    let second = registry.connection("client");
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(registry.active_count(), 1);
}

/// Тест проверяет, что соединение без переподключения удаляется после
/// `stale_after_secs`.
#[tokio::test(start_paused = true)]
async fn test_stale_connection_is_dropped_from_server() -> Result<()> {
    let settings = Settings {
        supported_connection_types: vec!["long-polling".into()],
        connection: ConnectionSettings {
            timeout_secs: 2.0,
            stale_after_secs: 5.0,
            ..ConnectionSettings::default()
        },
        ..Settings::default()
    };
    let server = Server::new(Arc::new(InMemoryEngine::default()), &settings);
    let client_id = handshake(&server).await?;

    let replies = server
        .process(
            msg(json!({"channel": "/meta/connect", "clientId": client_id, "connectionType": "long-polling"})),
            Origin::remote(),
        )
        .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].get("advice").unwrap()["timeout"], json!(2000));
    assert_eq!(server.connection_count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(server.connection_count(), 0);
    Ok(())
}

/// Тест проверяет внеочередное отпускание удерживаемого запроса транспортом.
#[tokio::test(start_paused = true)]
async fn test_flush_connection_releases_poll() -> Result<()> {
    let server = Arc::new(Server::from_settings(&Settings::default()));
    let client_id = handshake(&server).await?;

    let connect = msg(json!({
        "channel": "/meta/connect",
        "clientId": client_id,
        "connectionType": "long-polling"
    }));
    let poll = {
        let server = server.clone();
        let connect = connect.clone();
        tokio::spawn(async move { server.process(connect, Origin::remote()).await })
    };
    while !server
        .connections()
        .get(&client_id)
        .is_some_and(|c| c.is_connected())
    {
        tokio::task::yield_now().await;
    }

    server.flush_connection(&Batch::from(connect));
    let replies = tokio::time::timeout(Duration::from_millis(10), poll).await??;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].successful(), Some(true));
    Ok(())
}

/// Тест проверяет, что встроенный Engine удаляет клиентов без ping, а
/// реестр закрывает их соединения.
#[tokio::test(start_paused = true)]
async fn test_idle_clients_are_reaped() -> Result<()> {
    let settings = Settings {
        engine: EngineSettings {
            client_timeout_secs: 2.0,
            reap_interval_secs: 1.0,
            ..EngineSettings::default()
        },
        ..Settings::default()
    };
    let server = Server::from_settings(&settings);
    let client_id = handshake(&server).await?;
    server.connections().connection(&client_id);
    assert!(server.engine().client_exists(&client_id).await?);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!server.engine().client_exists(&client_id).await?);
    assert_eq!(server.connection_count(), 0);
    Ok(())
}

/// Тест проверяет, что сообщения для клиента без удерживаемого запроса
/// копятся и отдаются следующему connect.
#[tokio::test(start_paused = true)]
async fn test_messages_queue_between_polls() -> Result<()> {
    let engine = Arc::new(InMemoryEngine::default());
    let server = Server::new(engine.clone(), &Settings::default());
    let client_id = handshake(&server).await?;
    engine.subscribe(&client_id, "/news").await?;

    for n in 0..3 {
        server
            .process(msg(json!({"channel": "/news", "data": n})), Origin::Local)
            .await;
    }
    while !server
        .connections()
        .get(&client_id)
        .is_some_and(|c| c.queued() >= 3)
    {
        tokio::task::yield_now().await;
    }

    let connection = server.connections().connection(&client_id);
    let events = connection.connect(ConnectOptions::default()).await;
    let data: Vec<_> = events.iter().filter_map(|m| m.get("data").cloned()).collect();
    assert_eq!(data.len(), 3);
    Ok(())
}
