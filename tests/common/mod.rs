//! In-process scripted RESP server for integration tests.
//!
//! Speaks just enough of the protocol for the client under test: string
//! commands, key expiry, WATCH/MULTI/EXEC/DISCARD with per-key versions,
//! and PUBLISH/(P)SUBSCRIBE with push delivery. `CLIENT KILL` drops the
//! calling connection without a reply. Every accepted connection is counted
//! so tests can observe pool reuse.

#![allow(dead_code)]

use bytes::BytesMut;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use redline::resp::{RespParser, RespValue};
use redline::{Client, Config};

type Key = (u32, Vec<u8>);

const DATA_COMMANDS: &[&str] = &[
    "PING", "ECHO", "GET", "SET", "MGET", "MSET", "DEL", "EXISTS", "INCR", "INCRBY",
    "INCRBYFLOAT", "EXPIRE", "TTL", "KEYS", "SCAN", "PUBLISH",
];

pub struct MockServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start() -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Mutex::new(Store::default()));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, store.clone(), id));
            }
        });

        MockServer { port, accepted }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: self.port,
            ..Default::default()
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.config())
    }

    pub fn client_with_max_open(&self, max_open: usize) -> Client {
        Client::new(Config {
            max_open,
            ..self.config()
        })
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<RespValue>,
    channels: BTreeSet<Vec<u8>>,
    patterns: BTreeSet<Vec<u8>>,
}

impl Subscriber {
    fn count(&self) -> i64 {
        (self.channels.len() + self.patterns.len()) as i64
    }
}

#[derive(Default)]
struct Store {
    values: HashMap<Key, Vec<u8>>,
    expires: HashMap<Key, Instant>,
    versions: HashMap<Key, u64>,
    subscribers: HashMap<usize, Subscriber>,
}

impl Store {
    fn version(&self, key: &Key) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &Key) {
        *self.versions.entry(key.clone()).or_insert(0) += 1;
    }

    fn live(&mut self, key: &Key) -> Option<&Vec<u8>> {
        if self.expires.get(key).is_some_and(|at| *at <= Instant::now()) {
            self.expires.remove(key);
            self.values.remove(key);
            self.bump(key);
        }
        self.values.get(key)
    }

    fn write(&mut self, key: Key, value: Vec<u8>) {
        self.bump(&key);
        self.values.insert(key, value);
    }

    fn remove(&mut self, key: &Key) -> bool {
        let existed = self.live(key).is_some();
        if existed {
            self.values.remove(key);
            self.expires.remove(key);
            self.bump(key);
        }
        existed
    }

    fn matching_keys(&mut self, db: u32, pattern: &[u8]) -> Vec<RespValue> {
        let candidates: Vec<Key> = self
            .values
            .keys()
            .filter(|(d, k)| *d == db && glob_match(pattern, k))
            .cloned()
            .collect();
        let mut keys: Vec<Vec<u8>> = candidates
            .into_iter()
            .filter_map(|key| self.live(&key).map(|_| key.1.clone()))
            .collect();
        keys.sort();
        keys.into_iter().map(RespValue::bulk_string).collect()
    }

    fn incr_by(&mut self, key: Key, by: i64) -> RespValue {
        let current = match self.live(&key) {
            Some(raw) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok()) {
                Some(n) => n,
                None => return RespValue::error("ERR value is not an integer or out of range"),
            },
            None => 0,
        };
        match current.checked_add(by) {
            Some(next) => {
                self.write(key, next.to_string().into_bytes());
                RespValue::integer(next)
            }
            None => RespValue::error("ERR increment or decrement would overflow"),
        }
    }

    fn incr_by_float(&mut self, key: Key, by: &[u8]) -> RespValue {
        let Some(by) = parse_f64(by) else {
            return RespValue::error("ERR value is not a valid float");
        };
        let current = match self.live(&key) {
            Some(raw) => match parse_f64(raw) {
                Some(n) => n,
                None => return RespValue::error("ERR value is not a valid float"),
            },
            None => 0.0,
        };
        let next = (current + by).to_string();
        self.write(key, next.clone().into_bytes());
        RespValue::bulk_string(next)
    }

    fn publish(&self, channel: &[u8], payload: &[u8]) -> i64 {
        let mut receivers = 0;
        for sub in self.subscribers.values() {
            if sub.channels.contains(channel) {
                let _ = sub.tx.send(RespValue::array(vec![
                    RespValue::bulk_string(b"message".to_vec()),
                    RespValue::bulk_string(channel.to_vec()),
                    RespValue::bulk_string(payload.to_vec()),
                ]));
                receivers += 1;
            }
            for pattern in sub.patterns.iter().filter(|p| glob_match(p, channel)) {
                let _ = sub.tx.send(RespValue::array(vec![
                    RespValue::bulk_string(b"pmessage".to_vec()),
                    RespValue::bulk_string(pattern.clone()),
                    RespValue::bulk_string(channel.to_vec()),
                    RespValue::bulk_string(payload.to_vec()),
                ]));
                receivers += 1;
            }
        }
        receivers
    }

    /// Runs one data command against database `db`.
    fn run(&mut self, db: u32, args: &[Vec<u8>]) -> RespValue {
        let name = upper(&args[0]);
        let key = |i: usize| (db, args[i].clone());

        match (name.as_str(), args.len()) {
            ("PING", 1) => RespValue::simple_string("PONG"),
            ("PING", 2) | ("ECHO", 2) => RespValue::bulk_string(args[1].clone()),
            ("GET", 2) => match self.live(&key(1)) {
                Some(value) => RespValue::bulk_string(value.clone()),
                None => RespValue::null_bulk_string(),
            },
            ("SET", n) if n >= 3 => {
                self.expires.remove(&key(1));
                self.write(key(1), args[2].clone());
                RespValue::ok()
            }
            ("MGET", n) if n >= 2 => {
                let mut values = Vec::with_capacity(n - 1);
                for i in 1..n {
                    values.push(match self.live(&key(i)) {
                        Some(value) => RespValue::bulk_string(value.clone()),
                        None => RespValue::null_bulk_string(),
                    });
                }
                RespValue::array(values)
            }
            ("MSET", n) if n >= 3 && n % 2 == 1 => {
                for i in (1..n).step_by(2) {
                    self.expires.remove(&key(i));
                    self.write(key(i), args[i + 1].clone());
                }
                RespValue::ok()
            }
            ("DEL", n) if n >= 2 => {
                RespValue::integer((1..n).filter(|&i| self.remove(&key(i))).count() as i64)
            }
            ("EXISTS", n) if n >= 2 => {
                RespValue::integer((1..n).filter(|&i| self.live(&key(i)).is_some()).count() as i64)
            }
            ("INCR", 2) => self.incr_by(key(1), 1),
            ("INCRBY", 3) => match parse_i64(&args[2]) {
                Some(by) => self.incr_by(key(1), by),
                None => RespValue::error("ERR value is not an integer or out of range"),
            },
            ("INCRBYFLOAT", 3) => self.incr_by_float(key(1), &args[2]),
            ("EXPIRE", 3) => {
                let Some(secs) = parse_i64(&args[2]) else {
                    return RespValue::error("ERR value is not an integer or out of range");
                };
                if self.live(&key(1)).is_none() {
                    return RespValue::integer(0);
                }
                let at = Instant::now() + Duration::from_secs(secs.max(0) as u64);
                self.expires.insert(key(1), at);
                self.bump(&key(1));
                RespValue::integer(1)
            }
            ("TTL", 2) => {
                if self.live(&key(1)).is_none() {
                    return RespValue::integer(-2);
                }
                match self.expires.get(&key(1)) {
                    Some(at) => {
                        let left = at.saturating_duration_since(Instant::now());
                        RespValue::integer(((left.as_millis() + 500) / 1000) as i64)
                    }
                    None => RespValue::integer(-1),
                }
            }
            ("KEYS", 2) => RespValue::array(self.matching_keys(db, &args[1])),
            ("SCAN", n) if n >= 2 => {
                let mut pattern = b"*".to_vec();
                let mut i = 2;
                while i + 1 < n {
                    if upper(&args[i]) == "MATCH" {
                        pattern = args[i + 1].clone();
                    }
                    i += 2;
                }
                // Everything in one step.
                RespValue::array(vec![
                    RespValue::bulk_string(b"0".to_vec()),
                    RespValue::array(self.matching_keys(db, &pattern)),
                ])
            }
            ("PUBLISH", 3) => RespValue::integer(self.publish(&args[1], &args[2])),
            _ => RespValue::error(format!(
                "ERR unknown command '{}', or wrong number of arguments",
                name.to_lowercase()
            )),
        }
    }
}

enum Outcome {
    Reply(Vec<RespValue>),
    Close,
}

struct Session {
    id: usize,
    db: u32,
    watched: Vec<(Key, u64)>,
    queued: Option<Vec<Vec<Vec<u8>>>>,
}

impl Session {
    fn dispatch(&mut self, store: &Mutex<Store>, args: Vec<Vec<u8>>) -> Outcome {
        let name = upper(&args[0]);
        let mut store = store.lock().unwrap();

        let subscribed = store.subscribers.get(&self.id).is_some_and(|s| s.count() > 0);
        if subscribed
            && !matches!(
                name.as_str(),
                "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "PING"
            )
        {
            return reply(RespValue::error(format!(
                "ERR Can't execute '{}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING are allowed in this context",
                name.to_lowercase()
            )));
        }

        match name.as_str() {
            "CLIENT" if args.get(1).is_some_and(|a| upper(a) == "KILL") => Outcome::Close,
            "CLIENT" => reply(RespValue::ok()),
            "SELECT" => match args.get(1).and_then(|a| parse_i64(a)) {
                Some(db) if db >= 0 => {
                    self.db = db as u32;
                    reply(RespValue::ok())
                }
                _ => reply(RespValue::error("ERR invalid DB index")),
            },
            "WATCH" if self.queued.is_some() => {
                reply(RespValue::error("ERR WATCH inside MULTI is not allowed"))
            }
            "WATCH" => {
                for key in &args[1..] {
                    let key = (self.db, key.clone());
                    let version = store.version(&key);
                    self.watched.push((key, version));
                }
                reply(RespValue::ok())
            }
            "UNWATCH" if self.queued.is_none() => {
                self.watched.clear();
                reply(RespValue::ok())
            }
            "MULTI" if self.queued.is_some() => {
                reply(RespValue::error("ERR MULTI calls can not be nested"))
            }
            "MULTI" => {
                self.queued = Some(Vec::new());
                reply(RespValue::ok())
            }
            "EXEC" => {
                let Some(queued) = self.queued.take() else {
                    return reply(RespValue::error("ERR EXEC without MULTI"));
                };
                let watched = std::mem::take(&mut self.watched);
                let dirty = watched.iter().any(|(key, version)| {
                    store.live(key);
                    store.version(key) != *version
                });
                if dirty {
                    return reply(RespValue::null_array());
                }
                let results = queued.iter().map(|cmd| store.run(self.db, cmd)).collect();
                reply(RespValue::array(results))
            }
            "DISCARD" => {
                if self.queued.take().is_none() {
                    return reply(RespValue::error("ERR DISCARD without MULTI"));
                }
                self.watched.clear();
                reply(RespValue::ok())
            }
            "SUBSCRIBE" | "PSUBSCRIBE" | "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
                Outcome::Reply(self.subscription(&mut store, &name, &args[1..]))
            }
            _ if self.queued.is_some() => {
                if !DATA_COMMANDS.contains(&name.as_str()) {
                    return reply(RespValue::error(format!(
                        "ERR unknown command '{}'",
                        name.to_lowercase()
                    )));
                }
                if let Some(queue) = self.queued.as_mut() {
                    queue.push(args);
                }
                reply(RespValue::simple_string("QUEUED"))
            }
            _ => reply(store.run(self.db, &args)),
        }
    }

    fn subscription(&self, store: &mut Store, name: &str, targets: &[Vec<u8>]) -> Vec<RespValue> {
        let Some(sub) = store.subscribers.get_mut(&self.id) else {
            return vec![RespValue::error("ERR unknown connection")];
        };
        let kind = RespValue::bulk_string(name.to_lowercase().into_bytes());
        let ack = |target: RespValue, count: i64| RespValue::array(vec![kind.clone(), target, RespValue::integer(count)]);

        let patterns = name.starts_with('P');
        let mut frames = Vec::new();
        if name.ends_with("UNSUBSCRIBE") {
            let set = if patterns { &sub.patterns } else { &sub.channels };
            let targets: Vec<Vec<u8>> = if targets.is_empty() {
                set.iter().cloned().collect()
            } else {
                targets.to_vec()
            };
            if targets.is_empty() {
                frames.push(ack(RespValue::null_bulk_string(), sub.count()));
            }
            for target in targets {
                if patterns {
                    sub.patterns.remove(&target);
                } else {
                    sub.channels.remove(&target);
                }
                frames.push(ack(RespValue::bulk_string(target), sub.count()));
            }
        } else {
            for target in targets {
                if patterns {
                    sub.patterns.insert(target.clone());
                } else {
                    sub.channels.insert(target.clone());
                }
                frames.push(ack(RespValue::bulk_string(target.clone()), sub.count()));
            }
        }
        frames
    }
}

fn reply(value: RespValue) -> Outcome {
    Outcome::Reply(vec![value])
}

async fn serve(stream: TcpStream, store: Arc<Mutex<Store>>, id: usize) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    store.lock().unwrap().subscribers.insert(
        id,
        Subscriber {
            tx,
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
        },
    );

    let (mut reader, mut writer) = stream.into_split();
    let mut session = Session {
        id,
        db: 0,
        watched: Vec::new(),
        queued: None,
    };
    let mut buf = BytesMut::with_capacity(4096);
    let mut parser = RespParser::new();

    'conn: loop {
        loop {
            let frame = match parser.parse(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => break 'conn,
            };
            let Some(args) = command_args(frame) else {
                break 'conn;
            };
            match session.dispatch(&store, args) {
                Outcome::Reply(frames) => {
                    let mut out = Vec::new();
                    for frame in &frames {
                        frame.write_to(&mut out);
                    }
                    if writer.write_all(&out).await.is_err() {
                        break 'conn;
                    }
                }
                Outcome::Close => break 'conn,
            }
        }

        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                if !matches!(read, Ok(n) if n > 0) {
                    break 'conn;
                }
            }
            Some(push) = rx.recv() => {
                if writer.write_all(&push.serialize()).await.is_err() {
                    break 'conn;
                }
            }
        }
    }

    store.lock().unwrap().subscribers.remove(&id);
}

fn command_args(frame: RespValue) -> Option<Vec<Vec<u8>>> {
    match frame {
        RespValue::Array(Some(items)) if !items.is_empty() => items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(Some(data)) => Some(data),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn upper(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn parse_f64(raw: &[u8]) -> Option<f64> {
    std::str::from_utf8(raw)
        .ok()?
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// `*` and `?` wildcards only.
fn glob_match(pattern: &[u8], s: &[u8]) -> bool {
    match (pattern.first(), s.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], s) || (!s.is_empty() && glob_match(pattern, &s[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &s[1..]),
        (Some(p), Some(c)) if p == c => glob_match(&pattern[1..], &s[1..]),
        _ => false,
    }
}
