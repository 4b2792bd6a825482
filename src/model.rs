//! The shipped data model: seven entities covering users, SSH folder trees
//! and connections, chat folder trees and sessions, messages, and command
//! logs, plus typed decoders over [`Record`].
//!
//! The schema is data, not codegen: [`schema`] assembles it through the
//! registry builder, and the one generic entity client serves all seven.

use crate::error::{Result, TesseraError};
use crate::record::Record;
use crate::schema::{
    DefaultValue, EntityDef, FieldDef, FieldType, ReferentialAction, RelationDef, Schema,
    SchemaBuilder,
};
use crate::value::Value;

macro_rules! model_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl $name {
            /// Wire names of all variants, in declaration order.
            pub const VALUES: &'static [&'static str] = &[$($wire),+];

            /// Wire name of this variant.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            /// Parses a wire name.
            pub fn parse(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(TesseraError::validation(format!(
                        concat!("'{}' is not a ", stringify!($name), " variant"),
                        other
                    ))),
                }
            }
        }

        impl From<$name> for Value {
            fn from(v: $name) -> Value {
                Value::String(v.as_str().to_owned())
            }
        }
    };
}

model_enum! {
    /// Account role of a [`User`].
    Role {
        User => "USER",
        Admin => "ADMIN",
        Premium => "PREMIUM",
    }
}

model_enum! {
    /// How an [`SshConnection`] authenticates.
    AuthType {
        Password => "PASSWORD",
        PrivateKey => "PRIVATE_KEY",
        SshAgent => "SSH_AGENT",
    }
}

model_enum! {
    /// Last observed state of an [`SshConnection`].
    ConnectionStatus {
        Connected => "CONNECTED",
        Disconnected => "DISCONNECTED",
        Connecting => "CONNECTING",
        Error => "ERROR",
    }
}

model_enum! {
    /// Kind of a [`ChatSession`].
    SessionType {
        Chat => "CHAT",
        Ssh => "SSH",
        Mixed => "MIXED",
    }
}

model_enum! {
    /// Author role of a [`Message`].
    MessageRole {
        User => "USER",
        Assistant => "ASSISTANT",
        System => "SYSTEM",
        Function => "FUNCTION",
        Tool => "TOOL",
    }
}

model_enum! {
    /// Risk classification of a [`CommandLog`] entry.
    SafetyLevel {
        Safe => "SAFE",
        Caution => "CAUTION",
        Dangerous => "DANGEROUS",
    }
}

fn enum_field(name: &'static str, ty: &'static str, default: &str) -> FieldDef {
    FieldDef::required(name, FieldType::Enum(ty))
        .with_default(DefaultValue::Value(Value::String(default.to_owned())))
}

fn bool_field(name: &'static str, default: bool) -> FieldDef {
    FieldDef::required(name, FieldType::Bool)
        .with_default(DefaultValue::Value(Value::Bool(default)))
}

fn int_field(name: &'static str, default: i64) -> FieldDef {
    FieldDef::required(name, FieldType::Int)
        .with_default(DefaultValue::Value(Value::Int(default)))
}

fn timestamps(entity: EntityDef) -> EntityDef {
    entity
        .field(FieldDef::required("createdAt", FieldType::DateTime).with_default(DefaultValue::Now))
        .field(
            FieldDef::required("updatedAt", FieldType::DateTime)
                .with_default(DefaultValue::Now)
                .tracks_updates(),
        )
}

/// Builder pre-loaded with the full data model, for callers that want to
/// override delete policies before building.
///
/// Delete policy defaults: rows a [`User`] owns cascade with the user;
/// folder trees restrict (a folder with children cannot be deleted);
/// dependents reached through an optional foreign key are detached instead
/// (`folderId`, `sshConnectionId` set to null); messages cascade with their
/// session.
pub fn schema_builder() -> SchemaBuilder {
    Schema::builder()
        .with_enum("Role", Role::VALUES)
        .with_enum("AuthType", AuthType::VALUES)
        .with_enum("ConnectionStatus", ConnectionStatus::VALUES)
        .with_enum("SessionType", SessionType::VALUES)
        .with_enum("MessageRole", MessageRole::VALUES)
        .with_enum("SafetyLevel", SafetyLevel::VALUES)
        .with_entity(timestamps(
            EntityDef::new("User")
                .field(
                    FieldDef::required("uuid", FieldType::String)
                        .with_default(DefaultValue::GeneratedUuid),
                )
                .field(FieldDef::optional("email", FieldType::String))
                .field(FieldDef::optional("username", FieldType::String))
                .field(enum_field("role", "Role", "USER"))
                .field(bool_field("isActive", true))
                .field(FieldDef::optional("settings", FieldType::Json))
                .unique("uuid", &["uuid"])
                .unique("email", &["email"])
                .unique("username", &["username"])
                .relation(
                    RelationDef::many("sshFolders", "SshFolder", "userId")
                        .on_delete(ReferentialAction::Cascade),
                )
                .relation(
                    RelationDef::many("sshConnections", "SshConnection", "userId")
                        .on_delete(ReferentialAction::Cascade),
                )
                .relation(
                    RelationDef::many("chatFolders", "ChatFolder", "userId")
                        .on_delete(ReferentialAction::Cascade),
                )
                .relation(
                    RelationDef::many("chatSessions", "ChatSession", "userId")
                        .on_delete(ReferentialAction::Cascade),
                )
                .relation(
                    RelationDef::many("messages", "Message", "userId")
                        .on_delete(ReferentialAction::Cascade),
                )
                .relation(
                    RelationDef::many("commandLogs", "CommandLog", "userId")
                        .on_delete(ReferentialAction::Cascade),
                ),
        ))
        .with_entity(timestamps(
            EntityDef::new("SshFolder")
                .field(FieldDef::required("name", FieldType::String))
                .field(int_field("order", 0))
                .field(bool_field("isActive", true))
                .field(FieldDef::optional("parentId", FieldType::String))
                .field(FieldDef::required("userId", FieldType::String))
                .relation(RelationDef::one("user", "User", "userId"))
                .relation(RelationDef::one("parent", "SshFolder", "parentId").self_ref())
                .relation(
                    RelationDef::many("children", "SshFolder", "parentId")
                        .self_ref()
                        .on_delete(ReferentialAction::Restrict),
                )
                .relation(
                    RelationDef::many("connections", "SshConnection", "folderId")
                        .on_delete(ReferentialAction::SetNull),
                ),
        ))
        .with_entity(timestamps(
            EntityDef::new("SshConnection")
                .field(FieldDef::required("name", FieldType::String))
                .field(FieldDef::required("host", FieldType::String))
                .field(int_field("port", 22))
                .field(FieldDef::required("username", FieldType::String))
                .field(enum_field("authType", "AuthType", "PASSWORD"))
                .field(FieldDef::optional("password", FieldType::String))
                .field(FieldDef::optional("privateKey", FieldType::String))
                .field(FieldDef::optional("publicKey", FieldType::String))
                .field(FieldDef::optional("passphrase", FieldType::String))
                .field(enum_field("status", "ConnectionStatus", "DISCONNECTED"))
                .field(FieldDef::optional("lastUsed", FieldType::DateTime))
                .field(FieldDef::optional("meta", FieldType::Json))
                .field(FieldDef::optional("folderId", FieldType::String))
                .field(FieldDef::required("userId", FieldType::String))
                .relation(RelationDef::one("user", "User", "userId"))
                .relation(RelationDef::one("folder", "SshFolder", "folderId"))
                .relation(
                    RelationDef::many("chatSessions", "ChatSession", "sshConnectionId")
                        .on_delete(ReferentialAction::SetNull),
                )
                .relation(
                    RelationDef::many("commandLogs", "CommandLog", "sshConnectionId")
                        .on_delete(ReferentialAction::SetNull),
                ),
        ))
        .with_entity(timestamps(
            EntityDef::new("ChatFolder")
                .field(FieldDef::required("name", FieldType::String))
                .field(int_field("order", 0))
                .field(bool_field("isActive", true))
                .field(FieldDef::optional("parentId", FieldType::String))
                .field(FieldDef::required("userId", FieldType::String))
                .relation(RelationDef::one("user", "User", "userId"))
                .relation(RelationDef::one("parent", "ChatFolder", "parentId").self_ref())
                .relation(
                    RelationDef::many("children", "ChatFolder", "parentId")
                        .self_ref()
                        .on_delete(ReferentialAction::Restrict),
                )
                .relation(
                    RelationDef::many("sessions", "ChatSession", "folderId")
                        .on_delete(ReferentialAction::SetNull),
                ),
        ))
        .with_entity(timestamps(
            EntityDef::new("ChatSession")
                .field(FieldDef::required("title", FieldType::String))
                .field(enum_field("type", "SessionType", "CHAT"))
                .field(int_field("order", 0))
                .field(FieldDef::optional("config", FieldType::Json))
                .field(FieldDef::optional("meta", FieldType::Json))
                .field(FieldDef::optional("folderId", FieldType::String))
                .field(FieldDef::optional("sshConnectionId", FieldType::String))
                .field(FieldDef::required("userId", FieldType::String))
                .relation(RelationDef::one("user", "User", "userId"))
                .relation(RelationDef::one("folder", "ChatFolder", "folderId"))
                .relation(RelationDef::one("sshConnection", "SshConnection", "sshConnectionId"))
                .relation(
                    RelationDef::many("messages", "Message", "sessionId")
                        .on_delete(ReferentialAction::Cascade),
                ),
        ))
        .with_entity(timestamps(
            EntityDef::new("Message")
                .field(FieldDef::required("content", FieldType::String))
                .field(enum_field("role", "MessageRole", "USER"))
                .field(bool_field("isDeleted", false))
                .field(bool_field("isEdited", false))
                .field(FieldDef::optional("meta", FieldType::Json))
                .field(FieldDef::optional("extra", FieldType::Json))
                .field(FieldDef::optional("plugin", FieldType::Json))
                .field(FieldDef::optional("pluginState", FieldType::Json))
                .field(FieldDef::optional("translate", FieldType::Json))
                .field(FieldDef::optional("tts", FieldType::Json))
                .field(FieldDef::required("sessionId", FieldType::String))
                .field(FieldDef::required("userId", FieldType::String))
                .relation(RelationDef::one("session", "ChatSession", "sessionId"))
                .relation(RelationDef::one("user", "User", "userId")),
        ))
        // Logs are append-shaped: no update-tracked timestamp.
        .with_entity(
            EntityDef::new("CommandLog")
                .field(FieldDef::required("command", FieldType::String))
                .field(FieldDef::optional("output", FieldType::String))
                .field(FieldDef::optional("exitCode", FieldType::Int))
                .field(FieldDef::optional("duration", FieldType::Int))
                .field(enum_field("safetyLevel", "SafetyLevel", "SAFE"))
                .field(FieldDef::optional("metadata", FieldType::Json))
                .field(FieldDef::optional("sshConnectionId", FieldType::String))
                .field(FieldDef::required("userId", FieldType::String))
                .field(
                    FieldDef::required("createdAt", FieldType::DateTime)
                        .with_default(DefaultValue::Now),
                )
                .relation(RelationDef::one("user", "User", "userId"))
                .relation(RelationDef::one("sshConnection", "SshConnection", "sshConnectionId")),
        )
}

/// The full data model with default delete policies.
pub fn schema() -> Schema {
    schema_builder()
        .build()
        .expect("model schema is internally consistent")
}

/// A decoded `User` row.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub uuid: String,
    #[allow(missing_docs)]
    pub email: Option<String>,
    #[allow(missing_docs)]
    pub username: Option<String>,
    #[allow(missing_docs)]
    pub role: Role,
    #[allow(missing_docs)]
    pub is_active: bool,
    /// Free-form settings; `None` is the database null.
    pub settings: Option<serde_json::Value>,
    /// Epoch nanoseconds.
    pub created_at: i128,
    /// Epoch nanoseconds.
    pub updated_at: i128,
}

impl TryFrom<&Record> for User {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            uuid: r.str_field("uuid")?.to_owned(),
            email: r.opt_str_field("email")?.map(str::to_owned),
            username: r.opt_str_field("username")?.map(str::to_owned),
            role: Role::parse(r.str_field("role")?)?,
            is_active: r.bool_field("isActive")?,
            settings: r.json_field("settings")?.cloned(),
            created_at: r.datetime_field("createdAt")?,
            updated_at: r.datetime_field("updatedAt")?,
        })
    }
}

/// A decoded `SshFolder` row.
#[derive(Clone, Debug, PartialEq)]
pub struct SshFolder {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub order: i64,
    #[allow(missing_docs)]
    pub is_active: bool,
    #[allow(missing_docs)]
    pub parent_id: Option<String>,
    #[allow(missing_docs)]
    pub user_id: String,
    #[allow(missing_docs)]
    pub created_at: i128,
    #[allow(missing_docs)]
    pub updated_at: i128,
}

impl TryFrom<&Record> for SshFolder {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            name: r.str_field("name")?.to_owned(),
            order: r.int_field("order")?,
            is_active: r.bool_field("isActive")?,
            parent_id: r.opt_str_field("parentId")?.map(str::to_owned),
            user_id: r.str_field("userId")?.to_owned(),
            created_at: r.datetime_field("createdAt")?,
            updated_at: r.datetime_field("updatedAt")?,
        })
    }
}

/// A decoded `SshConnection` row. Secret material stays optional strings;
/// encryption at rest is the embedding application's concern.
#[derive(Clone, Debug, PartialEq)]
pub struct SshConnection {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub host: String,
    #[allow(missing_docs)]
    pub port: i64,
    #[allow(missing_docs)]
    pub username: String,
    #[allow(missing_docs)]
    pub auth_type: AuthType,
    #[allow(missing_docs)]
    pub password: Option<String>,
    #[allow(missing_docs)]
    pub private_key: Option<String>,
    #[allow(missing_docs)]
    pub public_key: Option<String>,
    #[allow(missing_docs)]
    pub passphrase: Option<String>,
    #[allow(missing_docs)]
    pub status: ConnectionStatus,
    #[allow(missing_docs)]
    pub last_used: Option<i128>,
    #[allow(missing_docs)]
    pub meta: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub folder_id: Option<String>,
    #[allow(missing_docs)]
    pub user_id: String,
    #[allow(missing_docs)]
    pub created_at: i128,
    #[allow(missing_docs)]
    pub updated_at: i128,
}

impl TryFrom<&Record> for SshConnection {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            name: r.str_field("name")?.to_owned(),
            host: r.str_field("host")?.to_owned(),
            port: r.int_field("port")?,
            username: r.str_field("username")?.to_owned(),
            auth_type: AuthType::parse(r.str_field("authType")?)?,
            password: r.opt_str_field("password")?.map(str::to_owned),
            private_key: r.opt_str_field("privateKey")?.map(str::to_owned),
            public_key: r.opt_str_field("publicKey")?.map(str::to_owned),
            passphrase: r.opt_str_field("passphrase")?.map(str::to_owned),
            status: ConnectionStatus::parse(r.str_field("status")?)?,
            last_used: r.opt_datetime_field("lastUsed")?,
            meta: r.json_field("meta")?.cloned(),
            folder_id: r.opt_str_field("folderId")?.map(str::to_owned),
            user_id: r.str_field("userId")?.to_owned(),
            created_at: r.datetime_field("createdAt")?,
            updated_at: r.datetime_field("updatedAt")?,
        })
    }
}

/// A decoded `ChatFolder` row.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatFolder {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub order: i64,
    #[allow(missing_docs)]
    pub is_active: bool,
    #[allow(missing_docs)]
    pub parent_id: Option<String>,
    #[allow(missing_docs)]
    pub user_id: String,
    #[allow(missing_docs)]
    pub created_at: i128,
    #[allow(missing_docs)]
    pub updated_at: i128,
}

impl TryFrom<&Record> for ChatFolder {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            name: r.str_field("name")?.to_owned(),
            order: r.int_field("order")?,
            is_active: r.bool_field("isActive")?,
            parent_id: r.opt_str_field("parentId")?.map(str::to_owned),
            user_id: r.str_field("userId")?.to_owned(),
            created_at: r.datetime_field("createdAt")?,
            updated_at: r.datetime_field("updatedAt")?,
        })
    }
}

/// A decoded `ChatSession` row.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSession {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub title: String,
    #[allow(missing_docs)]
    pub session_type: SessionType,
    #[allow(missing_docs)]
    pub order: i64,
    #[allow(missing_docs)]
    pub config: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub meta: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub folder_id: Option<String>,
    /// Meaningful only for `SSH`/`MIXED` sessions; not enforced here.
    pub ssh_connection_id: Option<String>,
    #[allow(missing_docs)]
    pub user_id: String,
    #[allow(missing_docs)]
    pub created_at: i128,
    #[allow(missing_docs)]
    pub updated_at: i128,
}

impl TryFrom<&Record> for ChatSession {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            title: r.str_field("title")?.to_owned(),
            session_type: SessionType::parse(r.str_field("type")?)?,
            order: r.int_field("order")?,
            config: r.json_field("config")?.cloned(),
            meta: r.json_field("meta")?.cloned(),
            folder_id: r.opt_str_field("folderId")?.map(str::to_owned),
            ssh_connection_id: r.opt_str_field("sshConnectionId")?.map(str::to_owned),
            user_id: r.str_field("userId")?.to_owned(),
            created_at: r.datetime_field("createdAt")?,
            updated_at: r.datetime_field("updatedAt")?,
        })
    }
}

/// A decoded `Message` row.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub content: String,
    #[allow(missing_docs)]
    pub role: MessageRole,
    #[allow(missing_docs)]
    pub is_deleted: bool,
    #[allow(missing_docs)]
    pub is_edited: bool,
    #[allow(missing_docs)]
    pub meta: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub extra: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub plugin: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub plugin_state: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub translate: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub tts: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub session_id: String,
    #[allow(missing_docs)]
    pub user_id: String,
    #[allow(missing_docs)]
    pub created_at: i128,
    #[allow(missing_docs)]
    pub updated_at: i128,
}

impl TryFrom<&Record> for Message {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            content: r.str_field("content")?.to_owned(),
            role: MessageRole::parse(r.str_field("role")?)?,
            is_deleted: r.bool_field("isDeleted")?,
            is_edited: r.bool_field("isEdited")?,
            meta: r.json_field("meta")?.cloned(),
            extra: r.json_field("extra")?.cloned(),
            plugin: r.json_field("plugin")?.cloned(),
            plugin_state: r.json_field("pluginState")?.cloned(),
            translate: r.json_field("translate")?.cloned(),
            tts: r.json_field("tts")?.cloned(),
            session_id: r.str_field("sessionId")?.to_owned(),
            user_id: r.str_field("userId")?.to_owned(),
            created_at: r.datetime_field("createdAt")?,
            updated_at: r.datetime_field("updatedAt")?,
        })
    }
}

/// A decoded `CommandLog` row. Append-shaped; carries no update timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandLog {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub command: String,
    #[allow(missing_docs)]
    pub output: Option<String>,
    #[allow(missing_docs)]
    pub exit_code: Option<i64>,
    #[allow(missing_docs)]
    pub duration: Option<i64>,
    #[allow(missing_docs)]
    pub safety_level: SafetyLevel,
    #[allow(missing_docs)]
    pub metadata: Option<serde_json::Value>,
    #[allow(missing_docs)]
    pub ssh_connection_id: Option<String>,
    #[allow(missing_docs)]
    pub user_id: String,
    #[allow(missing_docs)]
    pub created_at: i128,
}

impl TryFrom<&Record> for CommandLog {
    type Error = TesseraError;

    fn try_from(r: &Record) -> Result<Self> {
        Ok(Self {
            id: r.str_field("id")?.to_owned(),
            command: r.str_field("command")?.to_owned(),
            output: r.opt_str_field("output")?.map(str::to_owned),
            exit_code: r.opt_int_field("exitCode")?,
            duration: r.opt_int_field("duration")?,
            safety_level: SafetyLevel::parse(r.str_field("safetyLevel")?)?,
            metadata: r.json_field("metadata")?.cloned(),
            ssh_connection_id: r.opt_str_field("sshConnectionId")?.map(str::to_owned),
            user_id: r.str_field("userId")?.to_owned(),
            created_at: r.datetime_field("createdAt")?,
        })
    }
}
