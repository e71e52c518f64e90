//! Builders for the base NETCONF operations (RFC 6241) and the
//! schema-retrieval operations of RFC 6022.
//!
//! Everything here is a stateless translation from typed arguments to the
//! XML fragment that goes inside `<rpc>`. The session consumes the resulting
//! [`Request`] values; nothing in this module touches the wire. Datastore
//! names are passed through without interpretation.

use quick_xml::escape::escape;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::Error;
use crate::protocol::message::{RpcReply, MONITORING_NS};

/// A request body ready to be wrapped in an `<rpc>` envelope.
///
/// Produced by the builder functions below, or from a raw XML fragment via
/// the `From` impls for callers issuing vendor-specific RPCs.
#[derive(Debug, Clone)]
pub struct Request(String);

impl Request {
    /// Wraps a raw XML fragment without modification.
    pub fn raw(xml: impl Into<String>) -> Request {
        Request(xml.into())
    }

    pub(crate) fn into_body(self) -> String {
        self.0
    }

    /// The body fragment that will be placed inside `<rpc>`.
    pub fn body(&self) -> &str {
        &self.0
    }
}

impl From<String> for Request {
    fn from(xml: String) -> Request {
        Request(xml)
    }
}

impl From<&str> for Request {
    fn from(xml: &str) -> Request {
        Request(xml.to_string())
    }
}

/// A named configuration datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
    /// A datastore name this crate does not know; passed through verbatim.
    Named(String),
}

impl Datastore {
    fn element(&self) -> String {
        match self {
            Datastore::Running => "<running/>".to_string(),
            Datastore::Candidate => "<candidate/>".to_string(),
            Datastore::Startup => "<startup/>".to_string(),
            Datastore::Named(name) => format!("<{0}/>", escape(name.as_str())),
        }
    }
}

/// Source or target of copy-config / delete-config: a datastore or a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTarget {
    Datastore(Datastore),
    Url(String),
}

impl ConfigTarget {
    fn element(&self) -> String {
        match self {
            ConfigTarget::Datastore(ds) => ds.element(),
            ConfigTarget::Url(url) => format!("<url>{}</url>", escape(url.as_str())),
        }
    }
}

/// Filter applied to `get` and `get-config`.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Subtree filter: the fragment is embedded verbatim as the filter body.
    Subtree(String),
    /// XPath filter with its prefix-to-namespace bindings.
    Xpath {
        namespaces: Vec<(String, String)>,
        select: String,
    },
}

impl Filter {
    fn to_xml(&self) -> String {
        match self {
            Filter::Subtree(fragment) => {
                format!(r#"<filter type="subtree">{fragment}</filter>"#)
            }
            Filter::Xpath { namespaces, select } => {
                let mut xml = String::from(r#"<filter type="xpath""#);
                for (prefix, uri) in namespaces {
                    xml.push_str(&format!(
                        r#" xmlns:{}="{}""#,
                        prefix,
                        escape(uri.as_str())
                    ));
                }
                xml.push_str(&format!(r#" select="{}"/>"#, escape(select.as_str())));
                xml
            }
        }
    }
}

/// `default-operation` value for edit-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOperation {
    Merge,
    Replace,
    None,
}

impl DefaultOperation {
    fn name(&self) -> &'static str {
        match self {
            DefaultOperation::Merge => "merge",
            DefaultOperation::Replace => "replace",
            DefaultOperation::None => "none",
        }
    }
}

/// `test-option` value for edit-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOption {
    TestThenSet,
    Set,
    TestOnly,
}

impl TestOption {
    fn name(&self) -> &'static str {
        match self {
            TestOption::TestThenSet => "test-then-set",
            TestOption::Set => "set",
            TestOption::TestOnly => "test-only",
        }
    }
}

/// `error-option` value for edit-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOption {
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

impl ErrorOption {
    fn name(&self) -> &'static str {
        match self {
            ErrorOption::StopOnError => "stop-on-error",
            ErrorOption::ContinueOnError => "continue-on-error",
            ErrorOption::RollbackOnError => "rollback-on-error",
        }
    }
}

/// New configuration carried by an edit-config request.
#[derive(Debug, Clone)]
pub enum EditSource {
    /// Inline `<config>` payload; the fragment is embedded verbatim.
    Config(String),
    /// Configuration fetched by the server from a URL.
    Url(String),
}

/// An edit-config request under construction.
#[derive(Debug, Clone)]
pub struct EditConfig {
    target: Datastore,
    source: EditSource,
    default_operation: Option<DefaultOperation>,
    test_option: Option<TestOption>,
    error_option: Option<ErrorOption>,
}

impl EditConfig {
    pub fn new(target: Datastore, source: EditSource) -> EditConfig {
        EditConfig {
            target,
            source,
            default_operation: None,
            test_option: None,
            error_option: None,
        }
    }

    pub fn default_operation(mut self, op: DefaultOperation) -> EditConfig {
        self.default_operation = Some(op);
        self
    }

    pub fn test_option(mut self, opt: TestOption) -> EditConfig {
        self.test_option = Some(opt);
        self
    }

    pub fn error_option(mut self, opt: ErrorOption) -> EditConfig {
        self.error_option = Some(opt);
        self
    }
}

/// Builds a `<get>` request.
pub fn get(filter: Option<&Filter>) -> Request {
    match filter {
        Some(f) => Request(format!("<get>{}</get>", f.to_xml())),
        None => Request("<get/>".to_string()),
    }
}

/// Builds a `<get-config>` request against the given source datastore.
pub fn get_config(source: &Datastore, filter: Option<&Filter>) -> Request {
    let mut body = format!("<get-config><source>{}</source>", source.element());
    if let Some(f) = filter {
        body.push_str(&f.to_xml());
    }
    body.push_str("</get-config>");
    Request(body)
}

/// Builds an `<edit-config>` request.
pub fn edit_config(edit: &EditConfig) -> Request {
    let mut body = format!("<edit-config><target>{}</target>", edit.target.element());
    if let Some(op) = edit.default_operation {
        body.push_str(&format!(
            "<default-operation>{}</default-operation>",
            op.name()
        ));
    }
    if let Some(opt) = edit.test_option {
        body.push_str(&format!("<test-option>{}</test-option>", opt.name()));
    }
    if let Some(opt) = edit.error_option {
        body.push_str(&format!("<error-option>{}</error-option>", opt.name()));
    }
    match &edit.source {
        EditSource::Config(fragment) => {
            body.push_str(&format!("<config>{fragment}</config>"));
        }
        EditSource::Url(url) => {
            body.push_str(&format!("<url>{}</url>", escape(url.as_str())));
        }
    }
    body.push_str("</edit-config>");
    Request(body)
}

/// Builds a `<copy-config>` request.
pub fn copy_config(source: &ConfigTarget, target: &ConfigTarget) -> Request {
    Request(format!(
        "<copy-config><target>{}</target><source>{}</source></copy-config>",
        target.element(),
        source.element()
    ))
}

/// Builds a `<delete-config>` request.
pub fn delete_config(target: &ConfigTarget) -> Request {
    Request(format!(
        "<delete-config><target>{}</target></delete-config>",
        target.element()
    ))
}

/// Builds a `<lock>` request.
pub fn lock(target: &Datastore) -> Request {
    Request(format!(
        "<lock><target>{}</target></lock>",
        target.element()
    ))
}

/// Builds an `<unlock>` request.
pub fn unlock(target: &Datastore) -> Request {
    Request(format!(
        "<unlock><target>{}</target></unlock>",
        target.element()
    ))
}

/// Builds a `<discard-changes>` request.
pub fn discard_changes() -> Request {
    Request("<discard-changes/>".to_string())
}

/// Builds a `<close-session>` request.
pub fn close_session() -> Request {
    Request("<close-session/>".to_string())
}

/// Builds a `<kill-session>` request for another session.
pub fn kill_session(session_id: u32) -> Request {
    Request(format!(
        "<kill-session><session-id>{session_id}</session-id></kill-session>"
    ))
}

/// Builds a `<get-schema>` request (RFC 6022).
pub fn get_schema(identifier: &str, version: Option<&str>, format: Option<&str>) -> Request {
    let mut body = format!(
        r#"<get-schema xmlns="{MONITORING_NS}"><identifier>{}</identifier>"#,
        escape(identifier)
    );
    if let Some(version) = version {
        body.push_str(&format!("<version>{}</version>", escape(version)));
    }
    if let Some(format) = format {
        body.push_str(&format!("<format>{}</format>", escape(format)));
    }
    body.push_str("</get-schema>");
    Request(body)
}

/// Builds the `<get>` request that lists the schemas a server can export.
pub fn get_schemas() -> Request {
    let filter = Filter::Subtree(format!(
        r#"<netconf-state xmlns="{MONITORING_NS}"><schemas/></netconf-state>"#
    ));
    get(Some(&filter))
}

/// One schema advertised under `/netconf-state/schemas`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Schema {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub location: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaList {
    #[serde(rename = "schema", default)]
    schemas: Vec<Schema>,
}

#[derive(Debug, Default, Deserialize)]
struct NetconfState {
    #[serde(default)]
    schemas: SchemaList,
}

/// Decodes a reply's `<data>` payload into a caller-supplied type.
pub fn decode_data<T: DeserializeOwned>(reply: &RpcReply) -> Result<T, Error> {
    let data = reply
        .data
        .as_deref()
        .ok_or_else(|| Error::Xml("rpc-reply carries no <data>".to_string()))?;
    quick_xml::de::from_str(data).map_err(|e| Error::Xml(e.to_string()))
}

/// Decodes the schema list out of a [`get_schemas`] reply.
pub fn decode_schemas(reply: &RpcReply) -> Result<Vec<Schema>, Error> {
    let state: NetconfState = decode_data(reply)?;
    Ok(state.schemas.schemas)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn get_without_filter() {
        assert_eq!(get(None).body(), "<get/>");
    }

    #[test]
    fn get_with_subtree_filter() {
        let filter = Filter::Subtree("<interfaces/>".to_string());
        assert_eq!(
            get(Some(&filter)).body(),
            r#"<get><filter type="subtree"><interfaces/></filter></get>"#
        );
    }

    #[test]
    fn get_config_with_xpath_filter() {
        let filter = Filter::Xpath {
            namespaces: vec![("if".to_string(), "urn:example:if".to_string())],
            select: "/if:interfaces/if:interface".to_string(),
        };
        assert_eq!(
            get_config(&Datastore::Running, Some(&filter)).body(),
            r#"<get-config><source><running/></source><filter type="xpath" xmlns:if="urn:example:if" select="/if:interfaces/if:interface"/></get-config>"#
        );
    }

    #[test]
    fn edit_config_with_options() {
        let edit = EditConfig::new(
            Datastore::Candidate,
            EditSource::Config("<top><x/></top>".to_string()),
        )
        .default_operation(DefaultOperation::Merge)
        .error_option(ErrorOption::RollbackOnError);
        assert_eq!(
            edit_config(&edit).body(),
            "<edit-config><target><candidate/></target>\
             <default-operation>merge</default-operation>\
             <error-option>rollback-on-error</error-option>\
             <config><top><x/></top></config></edit-config>"
        );
    }

    #[test]
    fn edit_config_from_url() {
        let edit = EditConfig::new(
            Datastore::Running,
            EditSource::Url("file://config.xml".to_string()),
        );
        assert_eq!(
            edit_config(&edit).body(),
            "<edit-config><target><running/></target>\
             <url>file://config.xml</url></edit-config>"
        );
    }

    #[test]
    fn copy_and_delete_config() {
        let startup = ConfigTarget::Datastore(Datastore::Startup);
        let running = ConfigTarget::Datastore(Datastore::Running);
        assert_eq!(
            copy_config(&running, &startup).body(),
            "<copy-config><target><startup/></target><source><running/></source></copy-config>"
        );
        assert_eq!(
            delete_config(&ConfigTarget::Url("file://old.xml".to_string())).body(),
            "<delete-config><target><url>file://old.xml</url></target></delete-config>"
        );
    }

    #[test]
    fn session_management_bodies() {
        assert_eq!(
            lock(&Datastore::Running).body(),
            "<lock><target><running/></target></lock>"
        );
        assert_eq!(
            unlock(&Datastore::Running).body(),
            "<unlock><target><running/></target></unlock>"
        );
        assert_eq!(discard_changes().body(), "<discard-changes/>");
        assert_eq!(close_session().body(), "<close-session/>");
        assert_eq!(
            kill_session(4).body(),
            "<kill-session><session-id>4</session-id></kill-session>"
        );
    }

    #[test]
    fn get_schema_body() {
        assert_eq!(
            get_schema("ietf-interfaces", Some("2018-02-20"), Some("yang")).body(),
            format!(
                r#"<get-schema xmlns="{MONITORING_NS}"><identifier>ietf-interfaces</identifier><version>2018-02-20</version><format>yang</format></get-schema>"#
            )
        );
    }

    #[test]
    fn schema_list_decodes() {
        let reply = RpcReply {
            data: Some(format!(
                r#"<netconf-state xmlns="{MONITORING_NS}"><schemas>
                     <schema>
                       <identifier>ietf-interfaces</identifier>
                       <version>2018-02-20</version>
                       <format>yang</format>
                       <namespace>urn:ietf:params:xml:ns:yang:ietf-interfaces</namespace>
                       <location>NETCONF</location>
                     </schema>
                   </schemas></netconf-state>"#
            )),
            ..RpcReply::default()
        };
        let schemas = decode_schemas(&reply).expect("decode");
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].identifier, "ietf-interfaces");
        assert_eq!(schemas[0].location, vec!["NETCONF".to_string()]);
    }
}
