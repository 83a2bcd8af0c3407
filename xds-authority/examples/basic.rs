//! Example demonstrating xds-authority usage.
//!
//! This example shows:
//! - How to define a `ResourceType` with a `Decoder` for Envoy Listener
//! - How to build an `Authority` over the tonic transport
//! - How to register watches and handle their notifications
//!
//! # Configuration (environment variables)
//!
//! - `XDS_SERVER` — URI of the xDS management server (default: `http://localhost:18000`)
//! - `XDS_LISTENERS` — Comma-separated listener names to watch (required)
//! - `XDS_CA_CERT` — Path to PEM-encoded CA certificate (enables TLS)
//! - `XDS_CLIENT_CERT` — Path to PEM-encoded client certificate (for mTLS, requires `XDS_CA_CERT`)
//! - `XDS_CLIENT_KEY` — Path to PEM-encoded client key (for mTLS, requires `XDS_CLIENT_CERT`)
//!
//! # Usage
//!
//! ```sh
//! # Basic usage
//! XDS_LISTENERS=my-listener cargo run -p xds-authority --example basic
//!
//! # Multiple listeners
//! XDS_LISTENERS=listener-1,listener-2 cargo run -p xds-authority --example basic
//!
//! # Custom server
//! XDS_SERVER=http://xds.example.com:18000 XDS_LISTENERS=foo cargo run -p xds-authority --example basic
//! ```

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use envoy_types::pb::envoy::config::listener::v3::Listener as ListenerProto;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    HttpConnectionManager, http_connection_manager::RouteSpecifier,
};
use prost::Message;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};

use xds_authority::{
    AuthorityBuilder, AuthorityConfig, CallbackSerializer, DecodeResult, DecodedResource, Decoder,
    Error, Node, ResourceAny, ResourceData, ResourceType, ResourceWatcher, ServerConfig,
    TokioRuntime, TonicTransport, TypeRegistry,
};

const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

struct Args {
    server: String,
    ca_cert: Option<String>,
    client_cert: Option<String>,
    client_key: Option<String>,
    listeners: Vec<String>,
}

fn parse_args() -> Args {
    let server =
        std::env::var("XDS_SERVER").unwrap_or_else(|_| "http://localhost:18000".to_string());

    let listeners: Vec<String> = std::env::var("XDS_LISTENERS")
        .expect("XDS_LISTENERS env var is required (comma-separated listener names)")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if listeners.is_empty() {
        panic!("XDS_LISTENERS must contain at least one listener name");
    }

    let ca_cert = std::env::var("XDS_CA_CERT").ok();
    let client_cert = std::env::var("XDS_CLIENT_CERT").ok();
    let client_key = std::env::var("XDS_CLIENT_KEY").ok();

    if client_cert.is_some() && ca_cert.is_none() {
        panic!("XDS_CLIENT_CERT requires XDS_CA_CERT to be set");
    }
    if client_key.is_some() && client_cert.is_none() {
        panic!("XDS_CLIENT_KEY requires XDS_CLIENT_CERT to be set");
    }

    Args {
        server,
        ca_cert,
        client_cert,
        client_key,
        listeners,
    }
}

/// A simplified Listener resource for gRPC xDS.
///
/// Extracts the RDS route config name from the ApiListener's HttpConnectionManager.
#[derive(Debug, Clone)]
pub struct Listener {
    /// The listener name.
    pub name: String,
    /// The RDS route config name (from HttpConnectionManager).
    pub rds_route_config_name: Option<String>,
}

impl ResourceData for Listener {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ListenerDecoder;

impl Decoder for ListenerDecoder {
    fn decode(&self, resource: ResourceAny) -> DecodeResult {
        let message = match ListenerProto::decode(resource.value) {
            Ok(message) => message,
            Err(e) => {
                return DecodeResult::TopLevelError(Error::Decode {
                    type_url: resource.type_url,
                    message: e.to_string(),
                });
            }
        };

        let name = message.name.clone();
        let hcm = message
            .api_listener
            .and_then(|api| api.api_listener)
            .and_then(|any| HttpConnectionManager::decode(Bytes::from(any.value)).ok());
        let rds_route_config_name = hcm.and_then(|hcm| match hcm.route_specifier {
            Some(RouteSpecifier::Rds(rds)) => Some(rds.route_config_name),
            _ => None,
        });

        DecodeResult::Resource(DecodedResource::new(
            name.clone(),
            Arc::new(Listener {
                name,
                rds_route_config_name,
            }),
        ))
    }
}

/// Prints every notification for one watched listener.
struct PrintingWatcher {
    name: String,
}

impl ResourceWatcher for PrintingWatcher {
    fn on_update(&self, resource: DecodedResource) {
        let listener = resource.downcast_ref::<Listener>().unwrap();
        println!("Listener received:");
        println!("  name:        {}", listener.name);
        if let Some(ref rds) = listener.rds_route_config_name {
            println!("  rds_config:  {rds}");
        }
        println!();
        // In gRPC xDS you would cascadingly subscribe to RDS, CDS, EDS, etc.
    }

    fn on_error(&self, error: Error) {
        println!("Watch error for '{}': {error}", self.name);
    }

    fn on_resource_does_not_exist(&self) {
        println!("Listener '{}' does not exist", self.name);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    println!("xds-authority Example\n");
    println!("Connecting to xDS server: {}", args.server);

    let transport = match &args.ca_cert {
        Some(ca_path) => {
            let ca_cert = std::fs::read_to_string(ca_path)?;
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(&ca_cert));

            if let (Some(cert_path), Some(key_path)) = (&args.client_cert, &args.client_key) {
                let client_cert = std::fs::read_to_string(cert_path)?;
                let client_key = std::fs::read_to_string(key_path)?;
                tls = tls.identity(Identity::from_pem(client_cert, client_key));
            }

            let channel = Channel::from_shared(args.server.clone())?
                .tls_config(tls)?
                .connect()
                .await?;
            TonicTransport::from_channel(channel)
        }
        None => TonicTransport::connect(&ServerConfig::new(&args.server)).await?,
    };

    let listener_type = ResourceType::new(LISTENER_TYPE_URL, true, ListenerDecoder);
    let mut types = TypeRegistry::new();
    types.register(listener_type.clone());

    let node = Node::new("grpc", "1.0").with_id("example-node");
    let authority = AuthorityBuilder::new(
        AuthorityConfig::new(node),
        transport,
        TokioRuntime,
        CallbackSerializer::new(&TokioRuntime),
        Arc::new(types),
    )
    .build()?;

    println!("Starting watchers...\n");

    let mut handles = Vec::new();
    for name in &args.listeners {
        println!("Watching for Listener: '{name}'");
        let watcher = Arc::new(PrintingWatcher { name: name.clone() });
        handles.push(authority.watch_resource(&listener_type, name.clone(), watcher));
    }

    tokio::signal::ctrl_c().await?;

    drop(handles);
    authority.close();
    println!("Exiting");
    Ok(())
}
