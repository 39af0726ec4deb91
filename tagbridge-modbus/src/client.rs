//! Modbus device session and grouped tag reads.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::ExceptionCode;
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use tagbridge_common::ReadingSet;

use crate::codec::{self, AddressRange};
use crate::tags::{RegisterFunction, TagDefinition};

/// Error type for device operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Device not connected")]
    NotConnected,
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },
    #[error("Reading {function} registers failed: {message}")]
    Read {
        function: RegisterFunction,
        message: String,
    },
    #[error("Device exception reading {function} registers: {code}")]
    Exception {
        function: RegisterFunction,
        code: String,
    },
    #[error("Reading {function} registers timed out")]
    Timeout { function: RegisterFunction },
    #[error("{function} range {start}..={end} spans {count} points (limit {limit})")]
    RangeTooLarge {
        function: RegisterFunction,
        start: u16,
        end: u32,
        count: u32,
        limit: u32,
    },
    #[error("All {attempted} register groups failed")]
    AllGroupsFailed { attempted: usize },
}

/// Bulk reads against one device session.
///
/// Mirrors the four Modbus read functions the bridge uses.
#[async_trait]
pub trait RegisterReader: Send {
    async fn read_holding_registers(&mut self, start: u16, count: u16)
    -> Result<Vec<u16>, ClientError>;

    async fn read_input_registers(&mut self, start: u16, count: u16)
    -> Result<Vec<u16>, ClientError>;

    async fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, ClientError>;

    async fn read_discrete_inputs(&mut self, start: u16, count: u16)
    -> Result<Vec<bool>, ClientError>;

    /// Close the session. Errors are logged, not returned.
    async fn disconnect(&mut self);
}

/// Opens device sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Reader: RegisterReader;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Reader, ClientError>;
}

/// Modbus TCP connector backed by `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    unit_id: u8,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(unit_id: u8, timeout: Duration) -> Self {
        Self { unit_id, timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Reader = ModbusSession;

    async fn connect(&self, host: &str, port: u16) -> Result<ModbusSession, ClientError> {
        let endpoint = format!("{}:{}", host, port);
        let connection_error = |message: String| ClientError::Connection {
            endpoint: endpoint.clone(),
            message,
        };

        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| connection_error(format!("Invalid address: {}", e)))?
            .next()
            .ok_or_else(|| connection_error("Address did not resolve".to_string()))?;

        let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, Slave(self.unit_id)))
            .await
            .map_err(|_| connection_error("Connection timeout".to_string()))?
            .map_err(|e| connection_error(e.to_string()))?;

        Ok(ModbusSession { ctx })
    }
}

/// A connected `tokio-modbus` client context.
pub struct ModbusSession {
    ctx: Context,
}

fn read_error(function: RegisterFunction) -> impl Fn(tokio_modbus::Error) -> ClientError {
    move |e| ClientError::Read {
        function,
        message: e.to_string(),
    }
}

fn exception(function: RegisterFunction) -> impl Fn(ExceptionCode) -> ClientError {
    move |code| ClientError::Exception {
        function,
        code: format!("{:?}", code),
    }
}

#[async_trait]
impl RegisterReader for ModbusSession {
    async fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let function = RegisterFunction::Holding;
        Reader::read_holding_registers(&mut self.ctx, start, count)
            .await
            .map_err(read_error(function))?
            .map_err(exception(function))
    }

    async fn read_input_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let function = RegisterFunction::Input;
        Reader::read_input_registers(&mut self.ctx, start, count)
            .await
            .map_err(read_error(function))?
            .map_err(exception(function))
    }

    async fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, ClientError> {
        let function = RegisterFunction::Coil;
        Reader::read_coils(&mut self.ctx, start, count)
            .await
            .map_err(read_error(function))?
            .map_err(exception(function))
    }

    async fn read_discrete_inputs(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, ClientError> {
        let function = RegisterFunction::Discrete;
        Reader::read_discrete_inputs(&mut self.ctx, start, count)
            .await
            .map_err(read_error(function))?
            .map_err(exception(function))
    }

    async fn disconnect(&mut self) {
        if let Err(e) = Client::disconnect(&mut self.ctx).await {
            debug!(error = %e, "Error closing Modbus session");
        }
    }
}

/// Session state of a [`ProtocolClient`].
///
/// A failed connect leaves the client in `Failed` until the next read
/// attempt, which moves it to `Disconnected`. The error stays available
/// through [`ProtocolClient::last_error`] either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last connection attempt failed; see [`ProtocolClient::last_error`].
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Raw data returned by one bulk read.
enum GroupData {
    Registers(Vec<u16>),
    Bits(Vec<bool>),
}

/// Single-device session that reads tags grouped by register function.
pub struct ProtocolClient<C: Connector> {
    connector: C,
    host: String,
    port: u16,
    request_timeout: Duration,
    state: ClientState,
    session: Option<C::Reader>,
    last_error: Option<ClientError>,
}

impl<C: Connector> ProtocolClient<C> {
    pub fn new(connector: C, host: impl Into<String>, port: u16, request_timeout: Duration) -> Self {
        Self {
            connector,
            host: host.into(),
            port,
            request_timeout,
            state: ClientState::Disconnected,
            session: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Error from the most recent failed connection attempt, cleared by a
    /// successful one.
    pub fn last_error(&self) -> Option<&ClientError> {
        self.last_error.as_ref()
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open a session to the configured device.
    ///
    /// A failure leaves the client in [`ClientState::Failed`]; it is never fatal.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.session.is_some() {
            self.close().await;
        }

        self.state = ClientState::Connecting;
        match self.connector.connect(&self.host, self.port).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ClientState::Connected;
                self.last_error = None;
                info!(endpoint = %self.endpoint(), "Connected to device");
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Failed;
                self.last_error = Some(e.clone());
                warn!(endpoint = %self.endpoint(), error = %e, "Device connection failed");
                Err(e)
            }
        }
    }

    /// Close the session if one is open.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
            info!(endpoint = %self.endpoint(), "Device session closed");
        }
        self.state = ClientState::Disconnected;
    }

    /// Read every tag, one bulk request per register function.
    ///
    /// A failed group only drops its own tags from the result. When every
    /// attempted group fails the call fails as a whole and the session is
    /// dropped so the caller reconnects.
    pub async fn read_all(&mut self, tags: &[TagDefinition]) -> Result<ReadingSet, ClientError> {
        if !self.is_connected() {
            if self.state == ClientState::Failed {
                self.state = ClientState::Disconnected;
            }
            return Err(ClientError::NotConnected);
        }

        let mut readings = ReadingSet::now();
        let groups = codec::group_by_function(tags);
        let attempted = groups.len();
        let mut failures = Vec::new();

        for (function, group) in groups {
            match self.read_group(function, &group).await {
                Ok(decoded) => {
                    for (tag, value) in decoded {
                        readings.push(tag, value);
                    }
                }
                Err(e) => {
                    warn!(function = %function, tags = group.len(), error = %e, "Group read failed");
                    failures.push(e);
                }
            }
        }

        if attempted > 0 && failures.len() == attempted {
            warn!(endpoint = %self.endpoint(), "Every group failed, dropping session");
            self.close().await;
            return Err(ClientError::AllGroupsFailed { attempted });
        }

        debug!(
            readings = readings.len(),
            failed_groups = failures.len(),
            "Device read complete"
        );
        Ok(readings)
    }

    async fn read_group(
        &mut self,
        function: RegisterFunction,
        group: &[&TagDefinition],
    ) -> Result<Vec<(String, tagbridge_common::TagValue)>, ClientError> {
        let Some(range) = codec::covering_range(group.iter().copied()) else {
            return Ok(Vec::new());
        };
        let count = checked_count(function, range)?;
        let data = self.bulk_read(function, range.start, count).await?;

        let mut decoded = Vec::with_capacity(group.len());
        for tag in group {
            let offset = range.offset_of(tag.address);
            let value = match &data {
                GroupData::Registers(words) => codec::decode_register(words, offset, tag.data_type),
                GroupData::Bits(bits) => codec::decode_bit(bits, offset, tag.data_type),
            };
            match value {
                Some(value) => decoded.push((tag.name.clone(), value)),
                None => warn!(tag = %tag.name, function = %function, "Short response, tag skipped"),
            }
        }
        Ok(decoded)
    }

    async fn bulk_read(
        &mut self,
        function: RegisterFunction,
        start: u16,
        count: u16,
    ) -> Result<GroupData, ClientError> {
        let session = self.session.as_mut().ok_or(ClientError::NotConnected)?;
        debug!(function = %function, start, count, "Bulk read");

        let read = async {
            match function {
                RegisterFunction::Holding => session
                    .read_holding_registers(start, count)
                    .await
                    .map(GroupData::Registers),
                RegisterFunction::Input => session
                    .read_input_registers(start, count)
                    .await
                    .map(GroupData::Registers),
                RegisterFunction::Coil => session.read_coils(start, count).await.map(GroupData::Bits),
                RegisterFunction::Discrete => session
                    .read_discrete_inputs(start, count)
                    .await
                    .map(GroupData::Bits),
            }
        };

        tokio::time::timeout(self.request_timeout, read)
            .await
            .map_err(|_| ClientError::Timeout { function })?
    }
}

fn checked_count(function: RegisterFunction, range: AddressRange) -> Result<u16, ClientError> {
    let count = range.count();
    let limit = codec::read_limit(function);
    if count > limit || range.end > u32::from(u16::MAX) {
        return Err(ClientError::RangeTooLarge {
            function,
            start: range.start,
            end: range.end,
            count,
            limit,
        });
    }
    // count <= limit <= 2000, always fits
    Ok(count as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::DataType;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tagbridge_common::TagValue;

    type ReadLog = Arc<Mutex<Vec<(RegisterFunction, u16, u16)>>>;

    /// In-memory device: a flat register/bit table per function.
    #[derive(Default, Clone)]
    struct FakeDevice {
        registers: HashMap<RegisterFunction, Vec<u16>>,
        bits: HashMap<RegisterFunction, Vec<bool>>,
        failing: Vec<RegisterFunction>,
        rejecting: Vec<RegisterFunction>,
        log: ReadLog,
    }

    impl FakeDevice {
        fn record(&self, function: RegisterFunction, start: u16, count: u16) -> Result<(), ClientError> {
            self.log.lock().unwrap().push((function, start, count));
            if self.failing.contains(&function) {
                return Err(ClientError::Read {
                    function,
                    message: "broken pipe".to_string(),
                });
            }
            if self.rejecting.contains(&function) {
                return Err(ClientError::Exception {
                    function,
                    code: "IllegalDataAddress".to_string(),
                });
            }
            Ok(())
        }

        fn registers(&self, function: RegisterFunction, start: u16, count: u16) -> Result<Vec<u16>, ClientError> {
            self.record(function, start, count)?;
            let table = self.registers.get(&function).cloned().unwrap_or_default();
            Ok(table.into_iter().skip(start as usize).take(count as usize).collect())
        }

        fn bit_table(&self, function: RegisterFunction, start: u16, count: u16) -> Result<Vec<bool>, ClientError> {
            self.record(function, start, count)?;
            let table = self.bits.get(&function).cloned().unwrap_or_default();
            Ok(table.into_iter().skip(start as usize).take(count as usize).collect())
        }
    }

    #[async_trait]
    impl RegisterReader for FakeDevice {
        async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, ClientError> {
            self.registers(RegisterFunction::Holding, start, count)
        }

        async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, ClientError> {
            self.registers(RegisterFunction::Input, start, count)
        }

        async fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, ClientError> {
            self.bit_table(RegisterFunction::Coil, start, count)
        }

        async fn read_discrete_inputs(&mut self, start: u16, count: u16) -> Result<Vec<bool>, ClientError> {
            self.bit_table(RegisterFunction::Discrete, start, count)
        }

        async fn disconnect(&mut self) {}
    }

    struct FakeConnector {
        device: Option<FakeDevice>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Reader = FakeDevice;

        async fn connect(&self, host: &str, port: u16) -> Result<FakeDevice, ClientError> {
            self.device.clone().ok_or_else(|| ClientError::Connection {
                endpoint: format!("{}:{}", host, port),
                message: "connection refused".to_string(),
            })
        }
    }

    fn client(device: FakeDevice) -> ProtocolClient<FakeConnector> {
        ProtocolClient::new(
            FakeConnector { device: Some(device) },
            "plc",
            502,
            Duration::from_secs(1),
        )
    }

    fn tag(name: &str, address: u16, data_type: DataType, function: RegisterFunction) -> TagDefinition {
        TagDefinition::new(name, address, data_type, function)
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let mut client = client(FakeDevice::default());
        let result = client.read_all(&[]).await;
        assert_eq!(result.unwrap_err(), ClientError::NotConnected);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_is_recorded() {
        let mut client = ProtocolClient::new(
            FakeConnector { device: None },
            "plc",
            502,
            Duration::from_secs(1),
        );

        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ClientState::Failed);
        assert!(matches!(client.last_error(), Some(ClientError::Connection { .. })));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_failed_client_settles_to_disconnected() {
        let mut client = ProtocolClient::new(
            FakeConnector { device: None },
            "plc",
            502,
            Duration::from_secs(1),
        );
        let _ = client.connect().await;
        assert_eq!(client.state(), ClientState::Failed);

        assert_eq!(client.read_all(&[]).await.unwrap_err(), ClientError::NotConnected);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(client.last_error(), Some(ClientError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_holding_float_and_uint_single_read() {
        let [hi, lo] = codec::f32_to_words(21.75);
        let mut device = FakeDevice::default();
        device
            .registers
            .insert(RegisterFunction::Holding, vec![hi, lo, 0xFFFE]);
        let log = device.log.clone();

        let mut client = client(device);
        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);

        let tags = vec![
            tag("A", 0, DataType::Float32, RegisterFunction::Holding),
            tag("B", 2, DataType::UInt16, RegisterFunction::Holding),
        ];
        let readings = client.read_all(&tags).await.unwrap();

        assert_eq!(log.lock().unwrap().as_slice(), &[(RegisterFunction::Holding, 0, 3)]);
        assert_eq!(readings.get("A"), Some(TagValue::Float(21.75)));
        assert_eq!(readings.get("B"), Some(TagValue::Integer(65534)));
    }

    #[tokio::test]
    async fn test_failed_group_is_isolated() {
        let mut device = FakeDevice::default();
        device.failing.push(RegisterFunction::Holding);
        device.bits.insert(RegisterFunction::Coil, vec![false, true]);

        let mut client = client(device);
        client.connect().await.unwrap();

        let tags = vec![
            tag("A", 0, DataType::Float32, RegisterFunction::Holding),
            tag("B", 2, DataType::UInt16, RegisterFunction::Holding),
            tag("RUN", 1, DataType::Bool, RegisterFunction::Coil),
        ];
        let readings = client.read_all(&tags).await.unwrap();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings.get("RUN"), Some(TagValue::Bool(true)));
        assert!(!readings.contains("A"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_all_groups_failing_drops_session() {
        let mut device = FakeDevice::default();
        device.failing.push(RegisterFunction::Input);

        let mut client = client(device);
        client.connect().await.unwrap();

        let tags = vec![tag("L", 10, DataType::UInt16, RegisterFunction::Input)];
        let err = client.read_all(&tags).await.unwrap_err();

        assert_eq!(err, ClientError::AllGroupsFailed { attempted: 1 });
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_all_groups_rejected_drops_session() {
        // Device exceptions only, no transport error.
        let mut device = FakeDevice::default();
        device.rejecting.push(RegisterFunction::Holding);
        device.rejecting.push(RegisterFunction::Coil);

        let mut client = client(device);
        client.connect().await.unwrap();

        let tags = vec![
            tag("A", 0, DataType::UInt16, RegisterFunction::Holding),
            tag("RUN", 0, DataType::Bool, RegisterFunction::Coil),
        ];
        let err = client.read_all(&tags).await.unwrap_err();

        assert_eq!(err, ClientError::AllGroupsFailed { attempted: 2 });
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.read_all(&tags).await.unwrap_err(), ClientError::NotConnected);
    }

    #[tokio::test]
    async fn test_offsets_within_sparse_group() {
        let mut device = FakeDevice::default();
        let mut table = vec![0u16; 20];
        table[10] = 0x8000;
        table[15] = 7;
        device.registers.insert(RegisterFunction::Input, table);
        let mut discretes = vec![false; 8];
        discretes[6] = true;
        device.bits.insert(RegisterFunction::Discrete, discretes);
        let log = device.log.clone();

        let mut client = client(device);
        client.connect().await.unwrap();

        let tags = vec![
            tag("I1", 10, DataType::Int16, RegisterFunction::Input),
            tag("I2", 15, DataType::UInt16, RegisterFunction::Input),
            tag("D1", 2, DataType::Bool, RegisterFunction::Discrete),
            tag("D2", 6, DataType::Bool, RegisterFunction::Discrete),
        ];
        let readings = client.read_all(&tags).await.unwrap();

        assert_eq!(readings.get("I1"), Some(TagValue::Integer(-32768)));
        assert_eq!(readings.get("I2"), Some(TagValue::Integer(7)));
        assert_eq!(readings.get("D1"), Some(TagValue::Bool(false)));
        assert_eq!(readings.get("D2"), Some(TagValue::Bool(true)));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[
                (RegisterFunction::Input, 10, 6),
                (RegisterFunction::Discrete, 2, 5),
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_range_fails_group() {
        let mut device = FakeDevice::default();
        device.bits.insert(RegisterFunction::Coil, vec![true]);
        let log = device.log.clone();

        let mut client = client(device);
        client.connect().await.unwrap();

        let tags = vec![
            tag("LOW", 0, DataType::UInt16, RegisterFunction::Holding),
            tag("HIGH", 500, DataType::UInt16, RegisterFunction::Holding),
            tag("RUN", 0, DataType::Bool, RegisterFunction::Coil),
        ];
        let readings = client.read_all(&tags).await.unwrap();

        assert_eq!(readings.len(), 1);
        assert!(readings.contains("RUN"));
        // Oversized holding group never reached the wire.
        assert_eq!(log.lock().unwrap().as_slice(), &[(RegisterFunction::Coil, 0, 1)]);
    }

    #[tokio::test]
    async fn test_short_response_skips_uncovered_tags() {
        let mut device = FakeDevice::default();
        device.registers.insert(RegisterFunction::Holding, vec![1, 2]);

        let mut client = client(device);
        client.connect().await.unwrap();

        let tags = vec![
            tag("A", 0, DataType::UInt16, RegisterFunction::Holding),
            tag("F", 1, DataType::Float32, RegisterFunction::Holding),
        ];
        let readings = client.read_all(&tags).await.unwrap();

        assert_eq!(readings.get("A"), Some(TagValue::Integer(1)));
        assert!(!readings.contains("F"));
    }

    #[tokio::test]
    async fn test_close_returns_to_disconnected() {
        let mut client = client(FakeDevice::default());
        client.connect().await.unwrap();
        client.close().await;
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.read_all(&[]).await.unwrap_err(), ClientError::NotConnected);
    }
}
