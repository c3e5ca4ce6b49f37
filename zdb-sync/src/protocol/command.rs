use crate::position::Position;

/// Every command the sync engine issues against a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    NsInfo,
    NsSet,
    NsJump,
    DataExport,
    DataImport,
    DataRaw,
    Set,
    Del,
    AuthChallenge,
    AuthSecure,
    Select,
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::NsInfo,
        CommandKind::NsSet,
        CommandKind::NsJump,
        CommandKind::DataExport,
        CommandKind::DataImport,
        CommandKind::DataRaw,
        CommandKind::Set,
        CommandKind::Del,
        CommandKind::AuthChallenge,
        CommandKind::AuthSecure,
        CommandKind::Select,
    ];

    /// Leading tokens sent on the wire before the arguments
    pub fn words(&self) -> &'static [&'static str] {
        match self {
            CommandKind::NsInfo => &["NSINFO"],
            CommandKind::NsSet => &["NSSET"],
            CommandKind::NsJump => &["NSJUMP"],
            CommandKind::DataExport => &["DATA", "EXPORT"],
            CommandKind::DataImport => &["DATA", "IMPORT"],
            CommandKind::DataRaw => &["DATA", "RAW"],
            CommandKind::Set => &["SET"],
            CommandKind::Del => &["DEL"],
            CommandKind::AuthChallenge => &["AUTH", "SECURE", "CHALLENGE"],
            CommandKind::AuthSecure => &["AUTH", "SECURE"],
            CommandKind::Select => &["SELECT"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::NsInfo => "NSINFO",
            CommandKind::NsSet => "NSSET",
            CommandKind::NsJump => "NSJUMP",
            CommandKind::DataExport => "DATA EXPORT",
            CommandKind::DataImport => "DATA IMPORT",
            CommandKind::DataRaw => "DATA RAW",
            CommandKind::Set => "SET",
            CommandKind::Del => "DEL",
            CommandKind::AuthChallenge => "AUTH SECURE CHALLENGE",
            CommandKind::AuthSecure => "AUTH SECURE",
            CommandKind::Select => "SELECT",
        }
    }

    /// Commands that only make sense on an authenticated connection
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            CommandKind::AuthChallenge | CommandKind::AuthSecure | CommandKind::Select
        )
    }
}

/// A command ready to be sent: kind plus binary-safe arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: CommandKind,
    pub args: Vec<Vec<u8>>,
}

impl Request {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    pub fn position(self, position: Position) -> Self {
        self.arg(position.segment.to_string())
            .arg(position.offset.to_string())
    }

    pub fn ns_info(namespace: &str) -> Self {
        Self::new(CommandKind::NsInfo).arg(namespace)
    }

    pub fn ns_freeze(namespace: &str, enabled: bool) -> Self {
        Self::new(CommandKind::NsSet)
            .arg(namespace)
            .arg("freeze")
            .arg(if enabled { "1" } else { "0" })
    }

    pub fn ns_jump() -> Self {
        Self::new(CommandKind::NsJump)
    }

    pub fn data_export(from: Position) -> Self {
        Self::new(CommandKind::DataExport).position(from)
    }

    pub fn data_import(at: Position, blob: &[u8]) -> Self {
        Self::new(CommandKind::DataImport).position(at).arg(blob)
    }

    pub fn data_raw(at: Position) -> Self {
        Self::new(CommandKind::DataRaw).position(at)
    }

    pub fn set(key: &[u8], value: &[u8], marker: &[u8]) -> Self {
        Self::new(CommandKind::Set).arg(key).arg(value).arg(marker)
    }

    pub fn del(key: &[u8], marker: &[u8]) -> Self {
        Self::new(CommandKind::Del).arg(key).arg(marker)
    }

    pub fn auth_challenge() -> Self {
        Self::new(CommandKind::AuthChallenge)
    }

    pub fn auth_secure(digest: &str) -> Self {
        Self::new(CommandKind::AuthSecure).arg(digest)
    }

    pub fn select(namespace: &str, password: Option<&str>) -> Self {
        let request = Self::new(CommandKind::Select).arg(namespace);
        match password {
            Some(password) => request.arg(password),
            None => request,
        }
    }

    /// Convert to a `redis` command, leading words first
    pub fn to_cmd(&self) -> redis::Cmd {
        let words = self.kind.words();
        let mut cmd = redis::cmd(words[0]);
        for word in &words[1..] {
            cmd.arg(*word);
        }
        for arg in &self.args {
            cmd.arg(arg.as_slice());
        }
        cmd
    }
}
