//! Viewer sessions: one JSON object per line over any byte stream.
//!
//! On connect the viewer immediately gets the current snapshot, then every
//! snapshot the engine publishes. Alarms only go to sessions that announced
//! themselves as `admin` in a `hello`.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{info, warn};

use crate::config::AllowedOrigin;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::notify::Push;
use crate::observability::{self, request_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

/// Viewer → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Hello {
        role: Role,
        #[serde(default)]
        origin: Option<String>,
    },
    Register(NewReservation),
    Delete {
        id: ReservationId,
    },
    AdjustTime {
        id: ReservationId,
        delta_minutes: i64,
    },
    AddTime {
        id: ReservationId,
        minutes: i64,
    },
    SubtractTime {
        id: ReservationId,
        minutes: i64,
    },
    Edit {
        id: ReservationId,
        #[serde(flatten)]
        patch: ReservationPatch,
    },
}

/// Server → viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Snapshot(Arc<Snapshot>),
    Alarm(Alarm),
    Welcome { role: Role },
    RegistrationSuccess { table: Reservation },
    RegistrationError { message: String },
    EditError { message: String },
    Error { message: String },
}

impl ServerMessage {
    fn is_error(&self) -> bool {
        matches!(
            self,
            ServerMessage::RegistrationError { .. }
                | ServerMessage::EditError { .. }
                | ServerMessage::Error { .. }
        )
    }
}

// ── Intake validation ────────────────────────────────────────────

fn check_text(value: &str, max_len: usize, what: &'static str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Invalid(what));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(value.to_string())
}

fn check_party_size(n: u32) -> Result<u32, EngineError> {
    if n == 0 {
        return Err(EngineError::Invalid("party size must be at least 1"));
    }
    if n > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party size"));
    }
    Ok(n)
}

fn check_minutes(minutes: i64) -> Result<i64, EngineError> {
    if !(-MAX_ADJUST_MINUTES..=MAX_ADJUST_MINUTES).contains(&minutes) {
        return Err(EngineError::LimitExceeded("time adjustment"));
    }
    Ok(minutes)
}

/// Trim and bound-check a registration before it reaches the store.
pub fn validate_registration(new: NewReservation) -> Result<NewReservation, EngineError> {
    Ok(NewReservation {
        table_number: check_text(&new.table_number, MAX_TABLE_NUMBER_LEN, "table number")?,
        name: check_text(&new.name, MAX_NAME_LEN, "name")?,
        phone: check_text(&new.phone, MAX_PHONE_LEN, "phone")?,
        party_size: check_party_size(new.party_size)?,
    })
}

pub fn validate_patch(patch: ReservationPatch) -> Result<ReservationPatch, EngineError> {
    if patch.is_empty() {
        return Err(EngineError::Invalid("nothing to edit"));
    }
    Ok(ReservationPatch {
        table_number: patch
            .table_number
            .map(|t| check_text(&t, MAX_TABLE_NUMBER_LEN, "table number"))
            .transpose()?,
        name: patch.name.map(|n| check_text(&n, MAX_NAME_LEN, "name")).transpose()?,
        phone: patch.phone.map(|p| check_text(&p, MAX_PHONE_LEN, "phone")).transpose()?,
        party_size: patch.party_size.map(check_party_size).transpose()?,
    })
}

// ── Session ──────────────────────────────────────────────────────

enum Reply {
    None,
    Send(ServerMessage),
    Close(ServerMessage),
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

async fn send<W>(sink: &mut W, msg: &ServerMessage) -> io::Result<()>
where
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    let line = serde_json::to_string(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    sink.send(line).await.map_err(codec_err)
}

/// Serve one viewer until it disconnects.
pub async fn process_connection<S>(
    socket: S,
    engine: Arc<Engine>,
    allowed_origin: AllowedOrigin,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let (mut sink, mut stream) = framed.split::<String>();

    let (initial, mut pushes) = engine.notify.subscribe();
    send(&mut sink, &ServerMessage::Snapshot(initial)).await?;

    let mut role = Role::Viewer;
    loop {
        tokio::select! {
            push = pushes.recv() => match push {
                Ok(Push::Snapshot(snapshot)) => {
                    send(&mut sink, &ServerMessage::Snapshot(snapshot)).await?;
                }
                Ok(Push::Alarm(alarm)) => {
                    if role == Role::Admin {
                        send(&mut sink, &ServerMessage::Alarm(alarm)).await?;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("viewer lagged by {n} pushes, resending latest snapshot");
                    metrics::counter!(observability::VIEWERS_LAGGED_TOTAL).increment(1);
                    send(&mut sink, &ServerMessage::Snapshot(engine.notify.latest())).await?;
                }
                Err(RecvError::Closed) => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match handle_line(&engine, &allowed_origin, &mut role, &line).await {
                        Reply::None => {}
                        Reply::Send(msg) => send(&mut sink, &msg).await?,
                        Reply::Close(msg) => {
                            send(&mut sink, &msg).await?;
                            break;
                        }
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    let msg = ServerMessage::Error { message: "frame too long".into() };
                    send(&mut sink, &msg).await?;
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(e),
                None => break,
            },
        }
    }
    Ok(())
}

async fn handle_line(
    engine: &Engine,
    allowed_origin: &AllowedOrigin,
    role: &mut Role,
    line: &str,
) -> Reply {
    let msg: ClientMessage = match serde_json::from_str(line) {
        Ok(msg) => msg,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "request" => "malformed", "status" => "error")
                .increment(1);
            return Reply::Send(ServerMessage::Error {
                message: format!("malformed request: {e}"),
            });
        }
    };

    let label = request_label(&msg);
    let start = Instant::now();
    let reply = dispatch(engine, allowed_origin, role, msg).await;
    let status = match &reply {
        Reply::Send(m) | Reply::Close(m) if m.is_error() => "error",
        _ => "ok",
    };
    metrics::counter!(observability::REQUESTS_TOTAL, "request" => label, "status" => status).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "request" => label)
        .record(start.elapsed().as_secs_f64());
    reply
}

async fn dispatch(
    engine: &Engine,
    allowed_origin: &AllowedOrigin,
    role: &mut Role,
    msg: ClientMessage,
) -> Reply {
    match msg {
        ClientMessage::Hello { role: requested, origin } => {
            if let Some(origin) = origin
                && !allowed_origin.permits(&origin)
            {
                warn!("rejecting viewer from origin {origin}");
                metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                return Reply::Close(ServerMessage::Error {
                    message: format!("origin {origin} not allowed"),
                });
            }
            if requested == Role::Admin && *role != Role::Admin {
                info!("viewer joined as admin");
            }
            *role = requested;
            Reply::Send(ServerMessage::Welcome { role: requested })
        }
        ClientMessage::Register(new) => {
            let result = match validate_registration(new) {
                Ok(new) => engine.register(new).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(table) => Reply::Send(ServerMessage::RegistrationSuccess { table }),
                Err(e) => Reply::Send(ServerMessage::RegistrationError { message: e.to_string() }),
            }
        }
        ClientMessage::Delete { id } => {
            engine.delete(&id).await;
            Reply::None
        }
        ClientMessage::AdjustTime { id, delta_minutes } => adjust(engine, &id, delta_minutes).await,
        ClientMessage::AddTime { id, minutes } => adjust(engine, &id, minutes).await,
        ClientMessage::SubtractTime { id, minutes } => adjust(engine, &id, minutes.saturating_neg()).await,
        ClientMessage::Edit { id, patch } => {
            let result = match validate_patch(patch) {
                Ok(patch) => engine.edit(&id, patch).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => Reply::None,
                Err(e) => Reply::Send(ServerMessage::EditError { message: e.to_string() }),
            }
        }
    }
}

async fn adjust(engine: &Engine, id: &ReservationId, delta_minutes: i64) -> Reply {
    match check_minutes(delta_minutes) {
        Ok(delta) => {
            engine.adjust_time(id, delta).await;
            Reply::None
        }
        Err(e) => Reply::Send(ServerMessage::Error { message: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    type Client = Framed<DuplexStream, LinesCodec>;

    fn test_data_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tabletime_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Arc<Engine> {
        Arc::new(Engine::new(test_data_path(name), Arc::new(NotifyHub::new())))
    }

    fn connect(engine: &Arc<Engine>, origin: AllowedOrigin) -> Client {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let engine = engine.clone();
        tokio::spawn(async move {
            let _ = process_connection(server, engine, origin).await;
        });
        Framed::new(client, LinesCodec::new())
    }

    async fn send_json(client: &mut Client, value: serde_json::Value) {
        client.send(value.to_string()).await.unwrap();
    }

    async fn recv(client: &mut Client) -> ServerMessage {
        let line = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for server message")
            .expect("stream closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Skip snapshots until a non-snapshot message arrives.
    async fn recv_reply(client: &mut Client) -> ServerMessage {
        loop {
            match recv(client).await {
                ServerMessage::Snapshot(_) => continue,
                other => return other,
            }
        }
    }

    fn register_json(table: &str, name: &str, party: u32) -> serde_json::Value {
        serde_json::json!({
            "type": "register",
            "tableNumber": table,
            "name": name,
            "phone": "010-1234-5678",
            "partySize": party,
        })
    }

    #[tokio::test]
    async fn initial_snapshot_on_connect() {
        let engine = engine("initial.json");
        engine
            .register(NewReservation {
                table_number: "5".into(),
                name: "Kim".into(),
                phone: "1".into(),
                party_size: 2,
            })
            .await
            .unwrap();

        let mut client = connect(&engine, AllowedOrigin::Any);
        match recv(&mut client).await {
            ServerMessage::Snapshot(s) => {
                assert_eq!(s.tables.len(), 1);
                assert_eq!(s.tables[0].reservation.table_number, "5");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_replies_to_requester() {
        let engine = engine("register.json");
        let mut client = connect(&engine, AllowedOrigin::Any);

        send_json(&mut client, register_json("12", "Kim", 4)).await;
        let table = match recv_reply(&mut client).await {
            ServerMessage::RegistrationSuccess { table } => table,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(table.table_number, "12");
        assert_eq!(table.end_time - table.start_time, RESERVATION_DURATION_MS);

        send_json(&mut client, register_json("12", "Lee", 2)).await;
        match recv_reply(&mut client).await {
            ServerMessage::RegistrationError { message } => assert!(message.contains("12")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(engine.list().await.len(), 1);
    }

    #[tokio::test]
    async fn register_validation_failure() {
        let engine = engine("register_invalid.json");
        let mut client = connect(&engine, AllowedOrigin::Any);

        send_json(&mut client, register_json("1", "Kim", 0)).await;
        assert!(matches!(
            recv_reply(&mut client).await,
            ServerMessage::RegistrationError { .. }
        ));
        send_json(&mut client, register_json("   ", "Kim", 2)).await;
        assert!(matches!(
            recv_reply(&mut client).await,
            ServerMessage::RegistrationError { .. }
        ));
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn mutation_pushes_snapshot() {
        let engine = engine("mutation_push.json");
        let mut client = connect(&engine, AllowedOrigin::Any);
        let _initial = recv(&mut client).await;

        send_json(&mut client, register_json("3", "Kim", 2)).await;
        let table = match recv(&mut client).await {
            ServerMessage::RegistrationSuccess { table } => table,
            other => panic!("expected success, got {other:?}"),
        };
        match recv(&mut client).await {
            ServerMessage::Snapshot(s) => assert_eq!(s.find(&table.id).unwrap().reservation, table),
            other => panic!("expected snapshot, got {other:?}"),
        }

        send_json(&mut client, serde_json::json!({"type": "delete", "id": table.id})).await;
        match recv(&mut client).await {
            ServerMessage::Snapshot(s) => assert!(s.tables.is_empty()),
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_and_subtract_time_aliases() {
        let engine = engine("aliases.json");
        let r = engine
            .register(NewReservation {
                table_number: "8".into(),
                name: "Kim".into(),
                phone: "1".into(),
                party_size: 2,
            })
            .await
            .unwrap();
        let mut client = connect(&engine, AllowedOrigin::Any);
        let _initial = recv(&mut client).await;

        send_json(&mut client, serde_json::json!({"type": "addTime", "id": r.id, "minutes": 15})).await;
        let _ = recv(&mut client).await;
        assert_eq!(engine.get(&r.id).await.unwrap().end_time, r.end_time + 15 * MINUTE_MS);

        send_json(&mut client, serde_json::json!({"type": "subtractTime", "id": r.id, "minutes": 5})).await;
        let _ = recv(&mut client).await;
        send_json(&mut client, serde_json::json!({"type": "adjustTime", "id": r.id, "deltaMinutes": -10})).await;
        let _ = recv(&mut client).await;
        assert_eq!(engine.get(&r.id).await.unwrap().end_time, r.end_time);
    }

    #[tokio::test]
    async fn edit_collision_reports_edit_error() {
        let engine = engine("edit_error.json");
        let mut client = connect(&engine, AllowedOrigin::Any);
        send_json(&mut client, register_json("1", "Kim", 2)).await;
        let _ = recv_reply(&mut client).await;
        send_json(&mut client, register_json("2", "Lee", 2)).await;
        let second = match recv_reply(&mut client).await {
            ServerMessage::RegistrationSuccess { table } => table,
            other => panic!("expected success, got {other:?}"),
        };

        send_json(
            &mut client,
            serde_json::json!({"type": "edit", "id": second.id, "tableNumber": "1"}),
        )
        .await;
        assert!(matches!(recv_reply(&mut client).await, ServerMessage::EditError { .. }));
        assert_eq!(engine.get(&second.id).await.unwrap().table_number, "2");
    }

    #[tokio::test]
    async fn adjustment_bound_is_enforced() {
        let engine = engine("adjust_bound.json");
        let r = engine
            .register(NewReservation {
                table_number: "9".into(),
                name: "Kim".into(),
                phone: "1".into(),
                party_size: 2,
            })
            .await
            .unwrap();
        let mut client = connect(&engine, AllowedOrigin::Any);
        let _initial = recv(&mut client).await;

        for delta in [MAX_ADJUST_MINUTES + 1, -MAX_ADJUST_MINUTES - 1, i64::MIN, i64::MAX] {
            send_json(
                &mut client,
                serde_json::json!({"type": "adjustTime", "id": r.id, "deltaMinutes": delta}),
            )
            .await;
            assert!(matches!(recv_reply(&mut client).await, ServerMessage::Error { .. }));
        }
        send_json(
            &mut client,
            serde_json::json!({"type": "subtractTime", "id": r.id, "minutes": i64::MIN}),
        )
        .await;
        assert!(matches!(recv_reply(&mut client).await, ServerMessage::Error { .. }));
        assert_eq!(engine.get(&r.id).await.unwrap().end_time, r.end_time);

        send_json(
            &mut client,
            serde_json::json!({"type": "adjustTime", "id": r.id, "deltaMinutes": MAX_ADJUST_MINUTES}),
        )
        .await;
        let _ = recv(&mut client).await;
        assert_eq!(
            engine.get(&r.id).await.unwrap().end_time,
            r.end_time + MAX_ADJUST_MINUTES * MINUTE_MS
        );
        send_json(
            &mut client,
            serde_json::json!({"type": "adjustTime", "id": r.id, "deltaMinutes": -MAX_ADJUST_MINUTES}),
        )
        .await;
        let _ = recv(&mut client).await;
        assert_eq!(engine.get(&r.id).await.unwrap().end_time, r.end_time);
    }

    #[tokio::test]
    async fn alarms_only_reach_admins() {
        let engine = engine("alarms_admin.json");
        let r = engine
            .register(NewReservation {
                table_number: "4".into(),
                name: "Kim".into(),
                phone: "1".into(),
                party_size: 2,
            })
            .await
            .unwrap();
        engine.adjust_time(&r.id, -121).await.unwrap();

        let mut admin = connect(&engine, AllowedOrigin::Any);
        let mut viewer = connect(&engine, AllowedOrigin::Any);
        send_json(&mut admin, serde_json::json!({"type": "hello", "role": "admin"})).await;
        assert_eq!(recv_reply(&mut admin).await, ServerMessage::Welcome { role: Role::Admin });
        let _initial = recv(&mut viewer).await;

        engine.tick(crate::engine::now_ms()).await;

        let mut thresholds = Vec::new();
        for _ in 0..3 {
            match recv_reply(&mut admin).await {
                ServerMessage::Alarm(a) => {
                    assert_eq!(a.table_number, "4");
                    thresholds.push(a.threshold);
                }
                other => panic!("expected alarm, got {other:?}"),
            }
        }
        assert_eq!(thresholds, Threshold::ALL.to_vec());

        // Alarms precede the tick's snapshot, so the first push a viewer
        // sees after the tick must be that snapshot.
        match recv(&mut viewer).await {
            ServerMessage::Snapshot(s) => assert!(s.tables[0].reservation.notifications.expired),
            other => panic!("viewer got {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_origin_is_closed() {
        let engine = engine("origin.json");
        let mut client = connect(&engine, AllowedOrigin::parse("http://localhost:3000"));
        send_json(
            &mut client,
            serde_json::json!({"type": "hello", "role": "admin", "origin": "http://elsewhere"}),
        )
        .await;
        assert!(matches!(recv_reply(&mut client).await, ServerMessage::Error { .. }));
        let closed = tokio::time::timeout(Duration::from_secs(2), client.next()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_keeps_session_open() {
        let engine = engine("malformed.json");
        let mut client = connect(&engine, AllowedOrigin::Any);
        client.send("{not json".to_string()).await.unwrap();
        assert!(matches!(recv_reply(&mut client).await, ServerMessage::Error { .. }));

        send_json(&mut client, register_json("1", "Kim", 2)).await;
        assert!(matches!(
            recv_reply(&mut client).await,
            ServerMessage::RegistrationSuccess { .. }
        ));
    }

    #[test]
    fn client_message_wire_shape() {
        let msg: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "edit",
            "id": "abc",
            "name": "Park",
            "partySize": 3,
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Edit {
                id: ReservationId::from("abc"),
                patch: ReservationPatch {
                    name: Some("Park".into()),
                    party_size: Some(3),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn check_minutes_bounds() {
        assert_eq!(check_minutes(MAX_ADJUST_MINUTES).unwrap(), MAX_ADJUST_MINUTES);
        assert_eq!(check_minutes(-MAX_ADJUST_MINUTES).unwrap(), -MAX_ADJUST_MINUTES);
        assert!(check_minutes(MAX_ADJUST_MINUTES + 1).is_err());
        assert!(check_minutes(i64::MIN).is_err());
        assert!(check_minutes(i64::MAX).is_err());
    }

    #[test]
    fn validate_trims_fields() {
        let new = validate_registration(NewReservation {
            table_number: " 14 ".into(),
            name: "Kim ".into(),
            phone: " 010".into(),
            party_size: 2,
        })
        .unwrap();
        assert_eq!(new.table_number, "14");
        assert_eq!(new.name, "Kim");
        assert_eq!(new.phone, "010");
        assert!(validate_patch(ReservationPatch::default()).is_err());
    }
}
