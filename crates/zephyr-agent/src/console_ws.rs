use std::sync::atomic::Ordering;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;
use zephyr_process::{ClientMessage, STATUS_RUNNING, STATUS_STOPPED, ServerMessage};

use crate::{
    hub::{CLIENT_CHANNEL_CAPACITY, ClientId},
    server_info::{self, InfoInputs},
    state::AppContext,
    support::format_error_chain,
};

#[derive(Debug, serde::Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    running: bool,
}

async fn healthz(State(ctx): State<AppContext>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        running: ctx.supervisor.is_running().await,
    })
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/ws", get(console_ws))
        .route("/healthz", get(healthz))
        .with_state(ctx)
}

async fn console_ws(State(ctx): State<AppContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(ctx, socket))
}

async fn handle_socket(ctx: AppContext, socket: WebSocket) {
    let client = ClientId::next();
    let span = tracing::info_span!("console_ws", %client);
    async move {
        let (mut sender, mut receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<ServerMessage>(CLIENT_CHANNEL_CAPACITY);
        ctx.hub.attach(client, tx.clone()).await;

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode console message");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = receiver.next().await {
            let Ok(msg) = msg else { break };
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(cmd) => dispatch(&ctx, client, cmd).await,
                Err(err) => {
                    tracing::debug!(error = %err, "malformed client message");
                    Some(ServerMessage::error(format!("invalid message: {err}")))
                }
            };
            if let Some(reply) = reply {
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        }

        ctx.hub.detach(client).await;
        writer.abort();
    }
    .instrument(span)
    .await
}

/// Runs one client command. `None` means nothing to send back directly,
/// either because the command is fire-and-forget or because the hub push
/// already reached this client. A requester whose push was dropped gets the
/// status as a direct reply.
pub async fn dispatch(
    ctx: &AppContext,
    client: ClientId,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    let command = msg.command.trim();
    tracing::debug!(command, content_len = msg.content.len(), "client command");

    match command {
        "start" => {
            let Some(path) = ctx.config.snapshot().server_path() else {
                return Some(ServerMessage::error("ServerPath is not configured"));
            };
            let dropped = ctx.hub.dropped_pushes();
            match ctx.supervisor.start(&path).await {
                Ok(()) => reply_unless_pushed(ctx, client, dropped, STATUS_RUNNING).await,
                Err(err) => Some(ServerMessage::error(err.to_string())),
            }
        }
        "stop" => {
            let dropped = ctx.hub.dropped_pushes();
            match ctx.supervisor.stop().await {
                Ok(()) => reply_unless_pushed(ctx, client, dropped, STATUS_STOPPED).await,
                Err(err) => Some(ServerMessage::error(err.to_string())),
            }
        }
        "input" => match ctx.supervisor.send(&msg.content).await {
            Ok(()) => None,
            Err(err) => Some(ServerMessage::error(err.to_string())),
        },
        "status" => {
            let phase = ctx.supervisor.status().await.phase;
            Some(ServerMessage::status(phase.wire_status()))
        }
        "getPlayers" => Some(ServerMessage::players(ctx.roster.snapshot())),
        "getConsoleHistory" => {
            let history = ctx.history.lock().await;
            tracing::debug!(buffered = history.len(), "console history replay");
            let text = history.joined(ctx.replay_lines);
            Some(ServerMessage::console_history(text))
        }
        "getServerInfo" => {
            let recent_lines = ctx.history.lock().await.recent(server_info::SCAN_WINDOW);
            let info = server_info::collect(InfoInputs {
                config: &ctx.config,
                recent_lines,
                roster_count: ctx.roster.len(),
                session: ctx.supervisor.status().await,
            })
            .await;
            Some(ServerMessage::server_info(info))
        }
        "getPanelConfig" => match ctx.config.raw_json().await {
            Ok(raw) => Some(ServerMessage::panel_config(raw)),
            Err(err) => Some(ServerMessage::error(format_error_chain(&err))),
        },
        "setPanelConfig" => match ctx.config.replace_raw_json(&msg.content).await {
            Ok(cfg) => {
                ctx.enforce.store(cfg.uniteban, Ordering::Relaxed);
                tracing::info!(enforce = cfg.uniteban, "panel config updated");
                Some(ServerMessage::status("ok"))
            }
            Err(err) => Some(ServerMessage::error(format_error_chain(&err))),
        },
        other => {
            tracing::debug!(command = other, "unknown command");
            Some(ServerMessage::error(format!("unknown command: {other}")))
        }
    }
}

/// Replies directly unless the requester is attached and no push was dropped
/// since `dropped_before`.
async fn reply_unless_pushed(
    ctx: &AppContext,
    client: ClientId,
    dropped_before: u64,
    status: &str,
) -> Option<ServerMessage> {
    if ctx.hub.is_active(client).await && ctx.hub.dropped_pushes() == dropped_before {
        None
    } else {
        Some(ServerMessage::status(status))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use zephyr_process::Player;

    use super::*;
    use crate::config::ConfigStore;

    fn temp_dir_for(test_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "zephyr-agent-ws-{test_name}-{}-{n}-{ts}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn context(dir: &Path, server_path: &str) -> AppContext {
        let cfg_path = dir.join("config.json");
        std::fs::write(
            &cfg_path,
            serde_json::json!({
                "port": "127.0.0.1:0",
                "ServerPath": server_path,
                "Wrapper": "sh",
                "UnitebanUrl": "",
            })
            .to_string(),
        )
        .unwrap();
        let store = Arc::new(ConfigStore::load(&cfg_path).unwrap());
        AppContext::with_gate(store, None).unwrap()
    }

    fn cmd(command: &str, content: &str) -> ClientMessage {
        ClientMessage {
            command: command.into(),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn status_and_roster_queries() {
        let dir = temp_dir_for("queries");
        let ctx = context(&dir, "");
        let client = ClientId::next();

        assert_eq!(
            dispatch(&ctx, client, cmd("status", "")).await,
            Some(ServerMessage::status(STATUS_STOPPED))
        );
        ctx.roster.add(Player::new("Alice", "123"));
        assert_eq!(
            dispatch(&ctx, client, cmd("getPlayers", "")).await,
            Some(ServerMessage::players(vec![Player::new("Alice", "123")]))
        );
        assert_eq!(
            dispatch(&ctx, client, cmd("getConsoleHistory", "")).await,
            Some(ServerMessage::console_history(""))
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unknown_command_and_missing_path_are_errors() {
        let dir = temp_dir_for("errors");
        let ctx = context(&dir, "");
        let client = ClientId::next();

        let reply = dispatch(&ctx, client, cmd("reboot", "")).await.unwrap();
        assert!(reply.error.unwrap().contains("reboot"));

        let reply = dispatch(&ctx, client, cmd("start", "")).await.unwrap();
        assert!(reply.error.unwrap().contains("ServerPath"));

        assert_eq!(dispatch(&ctx, client, cmd("stop", "")).await, Some(ServerMessage::status(STATUS_STOPPED)));
        assert_eq!(dispatch(&ctx, client, cmd("input", "list")).await, None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn panel_config_round_trip_updates_enforcement() {
        let dir = temp_dir_for("panel");
        let ctx = context(&dir, "");
        let client = ClientId::next();
        assert!(ctx.enforce.load(Ordering::Relaxed));

        let raw = dispatch(&ctx, client, cmd("getPanelConfig", "")).await.unwrap();
        assert!(raw.file_content.unwrap().contains("ServerPath"));

        let reply = dispatch(
            &ctx,
            client,
            cmd("setPanelConfig", r#"{"ServerPath":"x","Uniteban":false}"#),
        )
        .await;
        assert_eq!(reply, Some(ServerMessage::status("ok")));
        assert!(!ctx.enforce.load(Ordering::Relaxed));

        let reply = dispatch(&ctx, client, cmd("setPanelConfig", "{")).await.unwrap();
        assert!(reply.error.is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn server_info_reply_is_populated() {
        let dir = temp_dir_for("info");
        let ctx = context(&dir, "");
        ctx.roster.add(Player::new("Alice", "1"));
        let reply = dispatch(&ctx, ClientId::next(), cmd("getServerInfo", ""))
            .await
            .unwrap();
        let info = reply.server_info.unwrap();
        assert_eq!(info.player_count, 1);
        assert_eq!(info.uptime, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_client_channel_gets_direct_status_reply() {
        let dir = temp_dir_for("full");
        let script = dir.join("server.sh");
        std::fs::write(&script, "exec cat\n").unwrap();
        let ctx = context(&dir, &script.to_string_lossy());
        let client = ClientId::next();

        let (tx, _backlog) = mpsc::channel(1);
        tx.try_send(ServerMessage::output("backlog")).unwrap();
        ctx.hub.attach(client, tx).await;
        assert_eq!(
            dispatch(&ctx, client, cmd("start", "")).await,
            Some(ServerMessage::status(STATUS_RUNNING))
        );
        assert_eq!(
            dispatch(&ctx, client, cmd("status", "")).await,
            Some(ServerMessage::status(STATUS_RUNNING))
        );
        assert_eq!(
            dispatch(&ctx, client, cmd("stop", "")).await,
            Some(ServerMessage::status(STATUS_STOPPED))
        );

        let (tx, mut rx) = mpsc::channel(16);
        ctx.hub.attach(client, tx).await;
        assert_eq!(dispatch(&ctx, client, cmd("start", "")).await, None);
        assert_eq!(rx.recv().await, Some(ServerMessage::players(Vec::new())));
        assert_eq!(rx.recv().await, Some(ServerMessage::status(STATUS_RUNNING)));
        assert_eq!(dispatch(&ctx, client, cmd("stop", "")).await, None);
        assert_eq!(rx.recv().await, Some(ServerMessage::status(STATUS_STOPPED)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn websocket_session_drives_the_server() {
        let dir = temp_dir_for("socket");
        let script = dir.join("server.sh");
        std::fs::write(&script, "exec cat\n").unwrap();
        let ctx = context(&dir, &script.to_string_lossy());
        let supervisor = ctx.supervisor.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router(ctx)).await;
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        async fn next_json(
            ws: &mut tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
        ) -> serde_json::Value {
            loop {
                let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
                    .await
                    .expect("timed out")
                    .expect("socket closed")
                    .unwrap();
                if let WsMessage::Text(text) = msg {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
            }
        }

        async fn send(
            ws: &mut tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            v: serde_json::Value,
        ) {
            ws.send(WsMessage::Text(v.to_string().into())).await.unwrap();
        }

        send(&mut ws, serde_json::json!({"command": "status"})).await;
        assert_eq!(next_json(&mut ws).await, serde_json::json!({"status": "stopped"}));

        send(&mut ws, serde_json::json!({"command": "start"})).await;
        assert_eq!(next_json(&mut ws).await, serde_json::json!({"players": []}));
        assert_eq!(next_json(&mut ws).await, serde_json::json!({"status": "running"}));

        send(&mut ws, serde_json::json!({"command": "input", "content": "hello"})).await;
        assert_eq!(next_json(&mut ws).await, serde_json::json!({"output": "hello"}));

        send(&mut ws, serde_json::json!({"command": "getConsoleHistory"})).await;
        let history = next_json(&mut ws).await;
        assert_eq!(history["fileContent"], "hello\n");

        send(&mut ws, serde_json::json!({"command": "stop"})).await;
        assert_eq!(next_json(&mut ws).await, serde_json::json!({"status": "stopped"}));

        ws.close(None).await.unwrap();
        assert!(!supervisor.is_running().await);
        server.abort();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
