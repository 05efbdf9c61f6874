use async_trait::async_trait;
use cinebook_core::repository::{ensure_keys, BoxError};
use cinebook_core::{
    ConfirmOutcome, HoldOutcome, ReleaseOutcome, ReservedSeat, SeatKey, SeatState, SeatStore, SeatStoreError,
};
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SEAT_KEY_PATTERN: &str = "screening:*:seat:*";
const SCAN_BATCH: usize = 500;

const HOLD_SCRIPT: &str = include_str!("../scripts/hold_seats.lua");
const CONFIRM_SCRIPT: &str = include_str!("../scripts/confirm_reserve.lua");
const RELEASE_SCRIPT: &str = include_str!("../scripts/release_hold.lua");
const RELEASE_RESERVATION_SCRIPT: &str = include_str!("../scripts/release_reservation.lua");

fn backend(err: redis::RedisError) -> SeatStoreError {
    SeatStoreError::Backend(Box::new(err) as BoxError)
}

/// Failure of a single script invocation.
#[derive(Debug)]
pub enum ScriptError {
    /// The store no longer knows the script handle (`NOSCRIPT`).
    Missing,
    Store(SeatStoreError),
}

impl From<redis::RedisError> for ScriptError {
    fn from(err: redis::RedisError) -> Self {
        if matches!(err.kind(), redis::ErrorKind::Server(redis::ServerErrorKind::NoScript)) {
            ScriptError::Missing
        } else {
            ScriptError::Store(backend(err))
        }
    }
}

/// The two primitives needed to run server-side scripts by handle.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Uploads the script source and returns its handle.
    async fn load(&self, source: &str) -> Result<String, ScriptError>;

    async fn eval_handle(&self, handle: &str, keys: &[String], args: &[String]) -> Result<Vec<String>, ScriptError>;
}

/// An atomic operation whose handle is loaded on first use and reloaded
/// once when the store reports it missing.
pub struct AtomicScript {
    name: &'static str,
    source: &'static str,
    handle: RwLock<Option<String>>,
}

impl AtomicScript {
    pub fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source, handle: RwLock::new(None) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    async fn current_handle<E: ScriptExecutor + ?Sized>(&self, exec: &E) -> Result<String, SeatStoreError> {
        if let Some(handle) = self.handle.read().await.as_ref() {
            return Ok(handle.clone());
        }
        self.reload(exec).await
    }

    async fn reload<E: ScriptExecutor + ?Sized>(&self, exec: &E) -> Result<String, SeatStoreError> {
        let mut slot = self.handle.write().await;
        let handle = exec.load(self.source).await.map_err(|e| match e {
            ScriptError::Missing => SeatStoreError::ScriptUnavailable {
                script: self.name,
                reason: "load reported missing script".to_string(),
            },
            ScriptError::Store(inner) => inner,
        })?;
        debug!(script = self.name, handle = %handle, "Loaded atomic script");
        *slot = Some(handle.clone());
        Ok(handle)
    }

    pub async fn invoke<E: ScriptExecutor + ?Sized>(
        &self,
        exec: &E,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<String>, SeatStoreError> {
        let handle = self.current_handle(exec).await?;
        match exec.eval_handle(&handle, keys, args).await {
            Ok(reply) => Ok(reply),
            Err(ScriptError::Store(e)) => Err(e),
            Err(ScriptError::Missing) => {
                warn!(script = self.name, "Script handle invalidated, reloading and retrying once");
                let handle = self.reload(exec).await?;
                exec.eval_handle(&handle, keys, args).await.map_err(|e| {
                    let reason = match e {
                        ScriptError::Missing => "handle missing after reload".to_string(),
                        ScriptError::Store(inner) => inner.to_string(),
                    };
                    SeatStoreError::ScriptUnavailable { script: self.name, reason }
                })
            }
        }
    }
}

/// Status-flag reply shared by all seat scripts: `["1"]` or `["0", key...]`.
#[derive(Debug, PartialEq, Eq)]
pub enum ScriptReply {
    Success,
    Failure(Vec<SeatKey>),
}

impl ScriptReply {
    pub fn decode(script: &'static str, reply: Vec<String>) -> Result<Self, SeatStoreError> {
        let flag = reply.first().cloned();
        match flag.as_deref() {
            Some("1") => Ok(ScriptReply::Success),
            Some("0") => {
                let keys: Result<Vec<SeatKey>, _> = reply[1..].iter().map(|raw| raw.parse::<SeatKey>()).collect();
                match keys {
                    Ok(keys) => Ok(ScriptReply::Failure(keys)),
                    Err(_) => Err(SeatStoreError::MalformedReply { script, reply }),
                }
            }
            _ => Err(SeatStoreError::MalformedReply { script, reply }),
        }
    }
}

#[derive(Clone)]
pub struct RedisExecutor {
    conn: MultiplexedConnection,
}

#[async_trait]
impl ScriptExecutor for RedisExecutor {
    async fn load(&self, source: &str) -> Result<String, ScriptError> {
        let mut conn = self.conn.clone();
        let handle: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await?;
        Ok(handle)
    }

    async fn eval_handle(&self, handle: &str, keys: &[String], args: &[String]) -> Result<Vec<String>, ScriptError> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = redis::cmd("EVALSHA")
            .arg(handle)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await?;
        Ok(reply)
    }
}

/// Seat store backed by Redis. Each transition is one Lua script, so every
/// multi-key check-and-set runs without interleaving.
pub struct RedisSeatStore {
    executor: RedisExecutor,
    hold_script: AtomicScript,
    confirm_script: AtomicScript,
    release_script: AtomicScript,
    release_reservation_script: AtomicScript,
}

fn store_keys(keys: &[SeatKey]) -> Vec<String> {
    keys.iter().map(SeatKey::to_store_key).collect()
}

fn ttl_arg(ttl: Duration) -> String {
    ttl.as_secs().max(1).to_string()
}

impl RedisSeatStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected seat store to Redis");
        Ok(Self {
            executor: RedisExecutor { conn },
            hold_script: AtomicScript::new("hold_seats", HOLD_SCRIPT),
            confirm_script: AtomicScript::new("confirm_reserve", CONFIRM_SCRIPT),
            release_script: AtomicScript::new("release_hold", RELEASE_SCRIPT),
            release_reservation_script: AtomicScript::new("release_reservation", RELEASE_RESERVATION_SCRIPT),
        })
    }

    async fn run(&self, script: &AtomicScript, keys: &[SeatKey], args: Vec<String>) -> Result<ScriptReply, SeatStoreError> {
        ensure_keys(keys)?;
        let reply = script.invoke(&self.executor, &store_keys(keys), &args).await?;
        ScriptReply::decode(script.name(), reply)
    }

    async fn scan_seat_keys(&self) -> Result<Vec<String>, SeatStoreError> {
        let mut conn = self.executor.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(SEAT_KEY_PATTERN)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn values(&self, keys: &[String]) -> Result<Vec<Option<String>>, SeatStoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.executor.conn.clone();
        redis::cmd("MGET").arg(keys).query_async(&mut conn).await.map_err(backend)
    }
}

#[async_trait]
impl SeatStore for RedisSeatStore {
    async fn hold(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
        ttl: Duration,
    ) -> Result<HoldOutcome, SeatStoreError> {
        let args = vec![hold_id.to_string(), ttl_arg(ttl), owner_id.to_string()];
        match self.run(&self.hold_script, keys, args).await? {
            ScriptReply::Success => Ok(HoldOutcome::Held),
            ScriptReply::Failure(unavailable) => Ok(HoldOutcome::Conflict { unavailable }),
        }
    }

    async fn confirm(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
        booking_id: Uuid,
        reserved_ttl: Duration,
    ) -> Result<ConfirmOutcome, SeatStoreError> {
        let args = vec![
            hold_id.to_string(),
            owner_id.to_string(),
            booking_id.to_string(),
            ttl_arg(reserved_ttl),
        ];
        match self.run(&self.confirm_script, keys, args).await? {
            ScriptReply::Success => Ok(ConfirmOutcome::Confirmed),
            ScriptReply::Failure(rejected) => Ok(ConfirmOutcome::Rejected { rejected }),
        }
    }

    async fn release(&self, keys: &[SeatKey], hold_id: Uuid, owner_id: Uuid) -> Result<ReleaseOutcome, SeatStoreError> {
        let args = vec![hold_id.to_string(), owner_id.to_string()];
        let not_owned = match self.run(&self.release_script, keys, args).await? {
            ScriptReply::Success => Vec::new(),
            ScriptReply::Failure(keys) => keys,
        };
        Ok(ReleaseOutcome { released: keys.len() - not_owned.len(), not_owned })
    }

    async fn release_reservation(&self, keys: &[SeatKey], booking_id: Uuid) -> Result<ReleaseOutcome, SeatStoreError> {
        let not_owned = match self.run(&self.release_reservation_script, keys, vec![booking_id.to_string()]).await? {
            ScriptReply::Success => Vec::new(),
            ScriptReply::Failure(keys) => keys,
        };
        Ok(ReleaseOutcome { released: keys.len() - not_owned.len(), not_owned })
    }

    async fn seed(&self, keys: &[SeatKey]) -> Result<usize, SeatStoreError> {
        ensure_keys(keys)?;
        let mut conn = self.executor.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("SET").arg(key.to_store_key()).arg(SeatState::Available.encode()).arg("NX");
        }
        let results: Vec<Option<String>> = pipe.query_async(&mut conn).await.map_err(backend)?;
        Ok(results.iter().filter(|r| r.is_some()).count())
    }

    async fn inspect(&self, keys: &[SeatKey]) -> Result<Vec<SeatState>, SeatStoreError> {
        ensure_keys(keys)?;
        let raw_keys = store_keys(keys);
        let values = self.values(&raw_keys).await?;
        raw_keys
            .into_iter()
            .zip(values)
            .map(|(key, value)| {
                SeatState::decode(value.as_deref()).ok_or_else(|| SeatStoreError::CorruptState {
                    key,
                    value: value.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn reserved_seats(&self) -> Result<Vec<ReservedSeat>, SeatStoreError> {
        let raw_keys = self.scan_seat_keys().await?;
        let mut reserved = Vec::new();

        for chunk in raw_keys.chunks(SCAN_BATCH) {
            let values = self.values(chunk).await?;
            let mut candidates = Vec::new();
            for (raw, value) in chunk.iter().zip(values) {
                let Some(value) = value else { continue };
                match SeatState::decode(Some(&value)) {
                    Some(SeatState::Reserved { booking_id }) => match raw.parse::<SeatKey>() {
                        Ok(key) => candidates.push((key, booking_id)),
                        Err(e) => warn!("Skipping unparseable seat key {}: {}", raw, e),
                    },
                    Some(_) => {}
                    None => warn!("Corrupt seat state at {}: {}", raw, value),
                }
            }
            if candidates.is_empty() {
                continue;
            }

            let mut conn = self.executor.conn.clone();
            let mut pipe = redis::pipe();
            for (key, _) in &candidates {
                pipe.cmd("PTTL").arg(key.to_store_key());
            }
            let ttls: Vec<i64> = pipe.query_async(&mut conn).await.map_err(backend)?;

            for ((key, booking_id), pttl) in candidates.into_iter().zip(ttls) {
                // -2: expired since the read; -1: no expiry
                let remaining_ttl = match pttl {
                    -2 => continue,
                    ms if ms < 0 => None,
                    ms => Some(Duration::from_millis(ms as u64)),
                };
                reserved.push(ReservedSeat { key, booking_id, remaining_ttl });
            }
        }

        Ok(reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Executor that can forget its loaded scripts, like `SCRIPT FLUSH`.
    #[derive(Default)]
    struct FlushingExecutor {
        loaded: Mutex<HashSet<String>>,
        loads: AtomicUsize,
        evals: AtomicUsize,
        never_keeps_scripts: AtomicBool,
    }

    impl FlushingExecutor {
        fn flush(&self) {
            self.loaded.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl ScriptExecutor for FlushingExecutor {
        async fn load(&self, source: &str) -> Result<String, ScriptError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            let handle = format!("sha-{}-{}", source.len(), n);
            if !self.never_keeps_scripts.load(Ordering::SeqCst) {
                self.loaded.lock().unwrap().insert(handle.clone());
            }
            Ok(handle)
        }

        async fn eval_handle(&self, handle: &str, keys: &[String], _args: &[String]) -> Result<Vec<String>, ScriptError> {
            self.evals.fetch_add(1, Ordering::SeqCst);
            if !self.loaded.lock().unwrap().contains(handle) {
                return Err(server_error(b"-NOSCRIPT No matching script. Please use EVAL.\r\n").into());
            }
            let mut reply = vec!["0".to_string()];
            reply.extend(keys.iter().cloned());
            Ok(reply)
        }
    }

    fn keys() -> Vec<String> {
        vec![SeatKey::new(Uuid::new_v4(), "A1").unwrap().to_store_key()]
    }

    #[tokio::test]
    async fn test_script_is_loaded_lazily_and_cached() {
        let exec = FlushingExecutor::default();
        let script = AtomicScript::new("hold_seats", HOLD_SCRIPT);
        assert_eq!(exec.loads.load(Ordering::SeqCst), 0);

        script.invoke(&exec, &keys(), &[]).await.unwrap();
        script.invoke(&exec, &keys(), &[]).await.unwrap();

        assert_eq!(exec.loads.load(Ordering::SeqCst), 1);
        assert_eq!(exec.evals.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flushed_script_is_reloaded_once_and_retried() {
        let exec = FlushingExecutor::default();
        let script = AtomicScript::new("confirm_reserve", CONFIRM_SCRIPT);
        script.invoke(&exec, &keys(), &[]).await.unwrap();

        exec.flush();
        let reply = script.invoke(&exec, &keys(), &[]).await.unwrap();

        assert_eq!(reply[0], "0");
        assert_eq!(exec.loads.load(Ordering::SeqCst), 2);
        assert_eq!(exec.evals.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_second_failure_surfaces_as_infrastructure_error() {
        let exec = FlushingExecutor::default();
        exec.never_keeps_scripts.store(true, Ordering::SeqCst);
        let script = AtomicScript::new("release_hold", RELEASE_SCRIPT);

        let err = script.invoke(&exec, &keys(), &[]).await.unwrap_err();

        assert!(matches!(err, SeatStoreError::ScriptUnavailable { script: "release_hold", .. }));
        assert_eq!(exec.loads.load(Ordering::SeqCst), 2);
        assert_eq!(exec.evals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reply_decoding() {
        let screening = Uuid::new_v4();
        let a1 = SeatKey::new(screening, "A1").unwrap();
        let a2 = SeatKey::new(screening, "A2").unwrap();

        assert_eq!(ScriptReply::decode("hold_seats", vec!["1".into()]).unwrap(), ScriptReply::Success);
        assert_eq!(
            ScriptReply::decode("hold_seats", vec!["0".into(), a1.to_store_key(), a2.to_store_key()]).unwrap(),
            ScriptReply::Failure(vec![a1, a2])
        );
        assert!(matches!(
            ScriptReply::decode("hold_seats", vec![]),
            Err(SeatStoreError::MalformedReply { .. })
        ));
        assert!(matches!(
            ScriptReply::decode("hold_seats", vec!["0".into(), "bogus".into()]),
            Err(SeatStoreError::MalformedReply { .. })
        ));
    }

    fn server_error(reply: &[u8]) -> redis::RedisError {
        redis::parse_redis_value(reply).unwrap().extract_error().unwrap_err()
    }

    #[test]
    fn test_noscript_reply_marks_script_missing() {
        let err = server_error(b"-NOSCRIPT No matching script. Please use EVAL.\r\n");
        assert!(matches!(ScriptError::from(err), ScriptError::Missing));
    }

    #[test]
    fn test_other_server_errors_are_backend_failures() {
        let err = server_error(b"-ERR wrong number of arguments for 'evalsha' command\r\n");
        assert!(matches!(ScriptError::from(err), ScriptError::Store(SeatStoreError::Backend(_))));
    }

    #[test]
    fn test_ttl_is_at_least_one_second() {
        assert_eq!(ttl_arg(Duration::from_millis(200)), "1");
        assert_eq!(ttl_arg(Duration::from_secs(600)), "600");
    }
}
