//! In-memory store speaking the sync command surface, for tests.
//!
//! Each namespace is a list of append-only segments. An entry occupies
//! `ENTRY_HEADER + key + value` bytes, so a slave replaying the master's entries
//! ends up at exactly the same cursor.

use crate::auth::challenge_digest;
use crate::error::ProtocolError;
use crate::position::Position;
use crate::protocol::{CommandKind, Request, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const ENTRY_HEADER: u64 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimEntry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub marker: u64,
}

impl SimEntry {
    fn size(&self) -> u64 {
        ENTRY_HEADER + self.key.len() as u64 + self.value.as_ref().map_or(0, |v| v.len() as u64)
    }
}

#[derive(Default)]
struct Namespace {
    password: Option<String>,
    segments: Vec<Vec<SimEntry>>,
    frozen: bool,
    keys: HashMap<Vec<u8>, Vec<u8>>,
}

impl Namespace {
    fn new(password: Option<&str>) -> Self {
        Self {
            password: password.map(str::to_string),
            segments: vec![Vec::new()],
            ..Default::default()
        }
    }

    fn segment_len(&self, segment: usize) -> u64 {
        self.segments[segment].iter().map(SimEntry::size).sum()
    }

    fn current(&self) -> Position {
        let last = self.segments.len() - 1;
        Position::new(last as u32, self.segment_len(last))
    }

    fn size_bytes(&self) -> u64 {
        self.segments.iter().flatten().map(SimEntry::size).sum()
    }

    fn append(&mut self, entry: SimEntry) {
        match &entry.value {
            Some(value) => self.keys.insert(entry.key.clone(), value.clone()),
            None => self.keys.remove(&entry.key),
        };
        if let Some(segment) = self.segments.last_mut() {
            segment.push(entry);
        }
    }

    /// Index of the entry starting at `offset`, `Ok(None)` at segment end
    fn locate(&self, at: Position) -> Result<Option<usize>, ProtocolError> {
        let segment = self
            .segments
            .get(at.segment as usize)
            .ok_or_else(|| ProtocolError::Server(format!("Invalid data id {}", at.segment)))?;

        let mut offset = 0;
        for (index, entry) in segment.iter().enumerate() {
            if offset == at.offset {
                return Ok(Some(index));
            }
            offset += entry.size();
        }

        if offset == at.offset {
            Ok(None)
        } else {
            Err(ProtocolError::Server(format!("Invalid offset {}", at.offset)))
        }
    }

    fn info(&self, name: &str) -> String {
        let current = self.current();
        format!(
            "# namespace\nname: {}\nentries: {}\npassword: {}\ndata_size_bytes: {}\n\
             data_current_id: {}\ndata_current_offset: {}\n",
            name,
            self.keys.len(),
            if self.password.is_some() { "yes" } else { "no" },
            self.size_bytes(),
            current.segment,
            current.offset,
        )
    }
}

/// Injected misbehaviour, consumed by the next command of the given kind
#[derive(Debug, Clone)]
pub enum Fault {
    /// Connection breaks before the command is executed
    Disconnect,
    /// SET is applied but the reply carries another key
    WrongEcho(Vec<u8>),
    /// SET is applied but the reply is nil
    NilEcho,
    /// Store rejects the command with an error reply
    Reject(String),
}

#[derive(Default)]
struct ServerState {
    admin: Option<String>,
    namespaces: HashMap<String, Namespace>,
    log: Vec<String>,
    faults: VecDeque<(CommandKind, Fault)>,
    refused_reconnects: u32,
    nonces: u64,
    markers: u64,
}

impl ServerState {
    fn namespace(&mut self, name: &str) -> Result<&mut Namespace, ProtocolError> {
        self.namespaces
            .get_mut(name)
            .ok_or_else(|| ProtocolError::Server("Namespace not found".to_string()))
    }

    fn take_fault(&mut self, kind: CommandKind) -> Option<Fault> {
        let index = self.faults.iter().position(|(k, _)| *k == kind)?;
        self.faults.remove(index).map(|(_, fault)| fault)
    }
}

/// Shared handle on one simulated store instance
#[derive(Clone, Default)]
pub struct SimServer {
    state: Arc<Mutex<ServerState>>,
}

impl SimServer {
    pub fn new(admin_password: Option<&str>) -> Self {
        let server = Self::default();
        server.state.lock().admin = admin_password.map(str::to_string);
        server
    }

    pub fn create_namespace(&self, name: &str, password: Option<&str>) {
        self.state
            .lock()
            .namespaces
            .insert(name.to_string(), Namespace::new(password));
    }

    pub fn connect(&self) -> SimConnection {
        SimConnection {
            server: self.clone(),
            connected: true,
            nonce: None,
            admin: false,
            selected: None,
        }
    }

    /// Local write, as a regular client of this store would do
    pub fn set(&self, namespace: &str, key: &[u8], value: &[u8]) {
        let mut state = self.state.lock();
        state.markers += 1;
        let marker = state.markers;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.append(SimEntry {
                key: key.to_vec(),
                value: Some(value.to_vec()),
                marker,
            });
        }
    }

    pub fn delete(&self, namespace: &str, key: &[u8]) {
        let mut state = self.state.lock();
        state.markers += 1;
        let marker = state.markers;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.append(SimEntry {
                key: key.to_vec(),
                value: None,
                marker,
            });
        }
    }

    /// Start a new segment
    pub fn rollover(&self, namespace: &str) {
        if let Some(ns) = self.state.lock().namespaces.get_mut(namespace) {
            ns.segments.push(Vec::new());
        }
    }

    pub fn position(&self, namespace: &str) -> Position {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map(Namespace::current)
            .unwrap_or_default()
    }

    pub fn size_bytes(&self, namespace: &str) -> u64 {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map(Namespace::size_bytes)
            .unwrap_or_default()
    }

    pub fn get(&self, namespace: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.keys.get(key).cloned())
    }

    pub fn is_frozen(&self, namespace: &str) -> bool {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .is_some_and(|ns| ns.frozen)
    }

    /// Every entry of every segment
    pub fn entries(&self, namespace: &str) -> Vec<Vec<SimEntry>> {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map(|ns| ns.segments.clone())
            .unwrap_or_default()
    }

    /// Names of the commands received so far
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().log.clear();
    }

    pub fn inject(&self, kind: CommandKind, fault: Fault) {
        self.state.lock().faults.push_back((kind, fault));
    }

    /// Refuse the next `count` reconnect attempts
    pub fn refuse_reconnects(&self, count: u32) {
        self.state.lock().refused_reconnects = count;
    }
}

/// One client connection to a [`SimServer`]
pub struct SimConnection {
    server: SimServer,
    connected: bool,
    nonce: Option<String>,
    admin: bool,
    selected: Option<String>,
}

fn text(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn number<T: std::str::FromStr>(arg: Option<&Vec<u8>>) -> Result<T, ProtocolError> {
    arg.and_then(|a| text(a).parse().ok())
        .ok_or_else(|| ProtocolError::Server("Invalid argument".to_string()))
}

fn position(args: &[Vec<u8>]) -> Result<Position, ProtocolError> {
    Ok(Position::new(number(args.first())?, number(args.get(1))?))
}

impl SimConnection {
    fn selected<'a>(&self, state: &'a mut ServerState) -> Result<&'a mut Namespace, ProtocolError> {
        let name = self
            .selected
            .as_deref()
            .ok_or_else(|| ProtocolError::Server("No namespace selected".to_string()))?;
        state.namespace(name)
    }

    fn handle(
        &mut self,
        state: &mut ServerState,
        request: &Request,
        fault: Option<Fault>,
    ) -> Result<Value, ProtocolError> {
        let args = &request.args;

        if let Some(Fault::Reject(reason)) = &fault {
            return Err(ProtocolError::Server(reason.clone()));
        }

        if request.kind.requires_auth() && state.admin.is_some() && !self.admin {
            return Err(ProtocolError::Server("Permission denied".to_string()));
        }

        match request.kind {
            CommandKind::AuthChallenge => {
                if state.admin.is_none() {
                    return Err(ProtocolError::Server("Authentication disabled".to_string()));
                }
                state.nonces += 1;
                let nonce = format!("{:016x}", state.nonces.wrapping_mul(0x9e37_79b9_7f4a_7c15));
                self.nonce = Some(nonce.clone());
                Ok(Value::SimpleString(nonce))
            }
            CommandKind::AuthSecure => {
                let admin = state
                    .admin
                    .clone()
                    .ok_or_else(|| ProtocolError::Server("Authentication disabled".to_string()))?;
                let nonce = self.nonce.take().ok_or_else(|| {
                    ProtocolError::Server("No CHALLENGE requested".to_string())
                })?;
                let digest = args.first().map(|a| text(a)).unwrap_or_default();
                if digest == challenge_digest(&nonce, &admin) {
                    self.admin = true;
                    Ok(Value::Okay)
                } else {
                    Err(ProtocolError::Server("Access denied".to_string()))
                }
            }
            CommandKind::Select => {
                let name = args.first().map(|a| text(a)).unwrap_or_default();
                let password = args.get(1).map(|a| text(a));
                let ns = state.namespace(&name)?;
                if ns.password.is_some() && ns.password != password {
                    return Err(ProtocolError::Server("Access denied".to_string()));
                }
                self.selected = Some(name);
                Ok(Value::Okay)
            }
            CommandKind::NsInfo => {
                let name = args.first().map(|a| text(a)).unwrap_or_default();
                let info = state.namespace(&name)?.info(&name);
                Ok(Value::BulkString(info.into_bytes()))
            }
            CommandKind::NsSet => {
                let name = args.first().map(|a| text(a)).unwrap_or_default();
                let enabled = args.get(2).map(|a| text(a)) == Some("1".to_string());
                state.namespace(&name)?.frozen = enabled;
                Ok(Value::Okay)
            }
            CommandKind::NsJump => {
                self.selected(state)?.segments.push(Vec::new());
                Ok(Value::Okay)
            }
            CommandKind::DataExport => {
                let at = position(args)?;
                let ns = self.selected(state)?;
                let index = ns.locate(at)?.ok_or(ProtocolError::Eof)?;
                let entries = &ns.segments[at.segment as usize][index..];
                let blob = serde_json::to_vec(entries)
                    .map_err(|e| ProtocolError::Server(e.to_string()))?;
                Ok(Value::BulkString(blob))
            }
            CommandKind::DataImport => {
                let at = position(args)?;
                let ns = self.selected(state)?;
                if ns.current() != at {
                    return Err(ProtocolError::Server(format!(
                        "Import position {} does not match {}",
                        at,
                        ns.current()
                    )));
                }
                let blob = args.get(2).cloned().unwrap_or_default();
                let entries: Vec<SimEntry> = serde_json::from_slice(&blob)
                    .map_err(|e| ProtocolError::Server(format!("Invalid payload: {}", e)))?;
                for entry in entries {
                    ns.append(entry);
                }
                Ok(Value::Okay)
            }
            CommandKind::DataRaw => {
                let at = position(args)?;
                let ns = self.selected(state)?;
                let index = ns.locate(at)?.ok_or(ProtocolError::Eof)?;
                let entry = ns.segments[at.segment as usize][index].clone();
                Ok(Value::Array(vec![
                    Value::BulkString(entry.key),
                    Value::Int(i64::from(at.segment)),
                    Value::Int(at.offset as i64),
                    Value::Int(if entry.value.is_some() { 0 } else { 1 }),
                    Value::Int(entry.marker as i64),
                    entry.value.map(Value::BulkString).unwrap_or(Value::Nil),
                ]))
            }
            CommandKind::Set => {
                state.markers += 1;
                let fallback = state.markers;
                let key = args.first().cloned().unwrap_or_default();
                let value = args.get(1).cloned().unwrap_or_default();
                let marker = number(args.get(2)).unwrap_or(fallback);
                let ns = self.selected(state)?;
                if ns.frozen {
                    return Err(ProtocolError::Server("Namespace is temporarily frozen".into()));
                }
                ns.append(SimEntry {
                    key: key.clone(),
                    value: Some(value),
                    marker,
                });
                match fault {
                    Some(Fault::WrongEcho(other)) => Ok(Value::BulkString(other)),
                    Some(Fault::NilEcho) => Ok(Value::Nil),
                    _ => Ok(Value::BulkString(key)),
                }
            }
            CommandKind::Del => {
                state.markers += 1;
                let fallback = state.markers;
                let key = args.first().cloned().unwrap_or_default();
                let marker = number(args.get(1)).unwrap_or(fallback);
                let ns = self.selected(state)?;
                if ns.frozen {
                    return Err(ProtocolError::Server("Namespace is temporarily frozen".into()));
                }
                if !ns.keys.contains_key(&key) {
                    return Err(ProtocolError::Server("Key not found".to_string()));
                }
                ns.append(SimEntry {
                    key,
                    value: None,
                    marker,
                });
                Ok(Value::Okay)
            }
        }
    }
}

#[async_trait]
impl Transport for SimConnection {
    async fn execute(&mut self, request: &Request) -> Result<Value, ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::Transport("connection reset by peer".to_string()));
        }

        let server = self.server.clone();
        let mut state = server.state.lock();

        let fault = state.take_fault(request.kind);
        if let Some(Fault::Disconnect) = fault {
            self.connected = false;
            return Err(ProtocolError::Transport("connection reset by peer".to_string()));
        }

        state.log.push(request.kind.name().to_string());
        self.handle(&mut state, request, fault)
    }

    async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        {
            let mut state = self.server.state.lock();
            if state.refused_reconnects > 0 {
                state.refused_reconnects -= 1;
                self.connected = false;
                return Err(ProtocolError::Transport("connection refused".to_string()));
            }
        }

        self.connected = true;
        self.nonce = None;
        self.admin = false;
        self.selected = None;
        Ok(())
    }
}
