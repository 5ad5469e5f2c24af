//! OPC UA session adapter (anonymous, no message security)
//!
//! The `opcua` client API is synchronous, so every call is moved onto the
//! blocking pool.

use super::{ControlServer, NodeInfo, NodeValue};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use opcua::client::prelude::*;
use opcua::sync::RwLock;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Connected control-server session
pub struct OpcSession {
    endpoint: String,
    session: Arc<RwLock<Session>>,
}

impl OpcSession {
    /// Connect to `endpoint` (e.g. `opc.tcp://localhost:4840/`)
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let url = endpoint.to_string();
        info!("Connecting to OPC UA server at {}", url);

        let session = tokio::task::spawn_blocking(move || Self::connect_blocking(&url))
            .await
            .map_err(|e| BridgeError::Connectivity(format!("connect task failed: {}", e)))??;

        info!("Connected to OPC UA server");
        Ok(Self {
            endpoint: endpoint.to_string(),
            session,
        })
    }

    fn connect_blocking(url: &str) -> Result<Arc<RwLock<Session>>> {
        let mut client = ClientBuilder::new()
            .application_name("IoT Bridge Agent")
            .application_uri("urn:iotbridge-agent")
            .product_uri("urn:iotbridge-agent")
            .trust_server_certs(true)
            .create_sample_keypair(true)
            .session_retry_limit(1)
            .client()
            .ok_or_else(|| BridgeError::Connectivity("invalid OPC UA client configuration".into()))?;

        let endpoint: EndpointDescription = (
            url,
            SecurityPolicy::None.to_str(),
            MessageSecurityMode::None,
            UserTokenPolicy::anonymous(),
        )
            .into();

        client
            .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
            .map_err(|status| BridgeError::Connectivity(format!("{}: {}", url, status)))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn parse_node_id(node_id: &str) -> Result<NodeId> {
    NodeId::from_str(node_id)
        .map_err(|status| BridgeError::Connectivity(format!("invalid node id {}: {}", node_id, status)))
}

fn browse_blocking(session: &RwLock<Session>, node_id: NodeId) -> Result<Vec<NodeInfo>> {
    let description = BrowseDescription {
        node_id,
        browse_direction: BrowseDirection::Forward,
        reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
        include_subtypes: true,
        node_class_mask: 0,
        result_mask: BrowseDescriptionResultMask::all().bits() as u32,
    };

    let results = session
        .read()
        .browse(&[description])
        .map_err(|status| BridgeError::Connectivity(format!("browse failed: {}", status)))?;

    let children = results
        .unwrap_or_default()
        .into_iter()
        .flat_map(|result| result.references.unwrap_or_default())
        .map(|reference| NodeInfo {
            node_id: reference.node_id.node_id.to_string(),
            display_name: reference.display_name.text.as_ref().to_string(),
        })
        .collect();

    Ok(children)
}

fn read_blocking(session: &RwLock<Session>, node_id: NodeId) -> Result<NodeValue> {
    let request = ReadValueId {
        node_id,
        attribute_id: AttributeId::Value as u32,
        index_range: UAString::null(),
        data_encoding: QualifiedName::null(),
    };

    let mut values = session
        .read()
        .read(&[request], TimestampsToReturn::Neither, 0.0)
        .map_err(|status| BridgeError::Connectivity(format!("read failed: {}", status)))?;

    Ok(resolve_variant(values.pop().and_then(|data_value| data_value.value)))
}

/// Collapse an OPC UA variant into the agent's value model
fn resolve_variant(variant: Option<Variant>) -> NodeValue {
    match variant {
        None | Some(Variant::Empty) => NodeValue::Null,
        Some(Variant::Boolean(v)) => NodeValue::Bool(v),
        Some(Variant::SByte(v)) => NodeValue::Int(v.into()),
        Some(Variant::Byte(v)) => NodeValue::Int(v.into()),
        Some(Variant::Int16(v)) => NodeValue::Int(v.into()),
        Some(Variant::UInt16(v)) => NodeValue::Int(v.into()),
        Some(Variant::Int32(v)) => NodeValue::Int(v.into()),
        Some(Variant::UInt32(v)) => NodeValue::Int(v.into()),
        Some(Variant::Int64(v)) => NodeValue::Int(v),
        Some(Variant::UInt64(v)) => i64::try_from(v)
            .map(NodeValue::Int)
            .unwrap_or(NodeValue::Float(v as f64)),
        Some(Variant::Float(v)) => NodeValue::Float(v.into()),
        Some(Variant::Double(v)) => NodeValue::Float(v),
        Some(Variant::String(s)) if s.is_null() => NodeValue::Null,
        Some(Variant::String(s)) => NodeValue::Text(s.as_ref().to_string()),
        Some(other) => NodeValue::Text(format!("{:?}", other)),
    }
}

#[async_trait]
impl ControlServer for OpcSession {
    async fn browse_children(&self, node_id: &str) -> Result<Vec<NodeInfo>> {
        let node = parse_node_id(node_id)?;
        let session = Arc::clone(&self.session);
        debug!("Browsing children of {}", node_id);

        tokio::task::spawn_blocking(move || browse_blocking(&session, node))
            .await
            .map_err(|e| BridgeError::Connectivity(format!("browse task failed: {}", e)))?
    }

    async fn read_node(&self, node_id: &str) -> Result<NodeValue> {
        let node = parse_node_id(node_id)?;
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || read_blocking(&session, node))
            .await
            .map_err(|e| BridgeError::Connectivity(format!("read task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_resolution() {
        assert_eq!(resolve_variant(None), NodeValue::Null);
        assert_eq!(resolve_variant(Some(Variant::Empty)), NodeValue::Null);
        assert_eq!(resolve_variant(Some(Variant::Int32(7))), NodeValue::Int(7));
        assert_eq!(resolve_variant(Some(Variant::Double(21.5))), NodeValue::Float(21.5));
        assert_eq!(resolve_variant(Some(Variant::Boolean(true))), NodeValue::Bool(true));
        assert_eq!(
            resolve_variant(Some(Variant::String(UAString::from("Unknown")))),
            NodeValue::Text("Unknown".into())
        );
        assert_eq!(resolve_variant(Some(Variant::String(UAString::null()))), NodeValue::Null);
    }

    #[test]
    fn test_parse_node_id() {
        assert!(parse_node_id("i=85").is_ok());
        assert!(parse_node_id("ns=2;s=Device 1/ProductionRate").is_ok());
    }
}
