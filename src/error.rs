// ABOUTME: Usage error taxonomy for malformed invocations
// ABOUTME: Raised before any database activity and mapped to exit status 2 by the CLI

/// Errors caused by how a command was invoked rather than by the database.
///
/// These are detected synchronously while arguments are interpreted, so a
/// `UsageError` always means no connection was opened and no query ran.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("need to specify DBMS {doing_what}")]
    MissingDbms { doing_what: String },

    #[error("unrecognized DBMS \"{dbms}\" {doing_what}")]
    UnknownDbms { dbms: String, doing_what: String },

    #[error("unrecognized {dbms} connection params \"{params}\" {doing_what}")]
    UnknownParams {
        dbms: String,
        params: String,
        doing_what: String,
    },

    #[error("connection param \"{param}\" must have the form name=value {doing_what}")]
    MalformedParam { param: String, doing_what: String },

    #[error("invalid value \"{value}\" for {dbms} connection param {name}: {reason}")]
    InvalidParamValue {
        dbms: String,
        name: String,
        value: String,
        reason: String,
    },

    #[error("{dbms} connection needs a \"{name}\" param {doing_what}")]
    MissingParam {
        dbms: String,
        name: String,
        doing_what: String,
    },

    #[error("unknown connection alias \"@{0}\"")]
    UnknownAlias(String),

    #[error("malformed field name \"{0}\"")]
    MalformedField(String),

    #[error("wildcard \"*\" needs a single table, not a join: {0}")]
    WildcardOnJoin(String),

    #[error("remap directive \"{0}\" must have the form field:value1:value2")]
    MalformedRemap(String),

    #[error("malformed filename template \"{template}\": {reason}")]
    MalformedTemplate { template: String, reason: String },
}

/// Returns the usage error carried by an `anyhow` chain, if any
pub fn usage_error(err: &anyhow::Error) -> Option<&UsageError> {
    err.chain().find_map(|cause| cause.downcast_ref::<UsageError>())
}
