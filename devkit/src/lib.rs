/*!
# IoT Bridge DevKit - in-memory doubles for tests

Lets the agent and the reactors be exercised without a control server,
a hub or a broker:
- Control server with scripted browse results and tag values
- Device-side hub doubles (reported properties, telemetry links)
- Service-side hub with twins, ETags and scripted conflicts
- Builders for credentials and alert payloads
*/

pub mod builders;
pub mod hub_stub;
pub mod opc_stub;
pub mod service_stub;

pub use builders::{credential, credentials, AlertBuilder};
pub use hub_stub::{MockPropertyReporter, MockTelemetryConnector, SentEvent};
pub use opc_stub::MockControlServer;
pub use service_stub::{MockServiceHub, TwinUpdate};
