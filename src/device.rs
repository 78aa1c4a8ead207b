// Outbound command model and the transport seam to the Racebox hardware

use log::debug;

use crate::RaceboxError;

/// Text commands understood by the device firmware
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCommand {
    Authenticate(String),
    RaceOn,
    RaceOff,
    SetupOn,
    SetupOff,
    SetPassword(String),
}

impl DeviceCommand {
    /// The exact line written to the link, terminator included
    pub fn wire(&self) -> String {
        match self {
            DeviceCommand::Authenticate(key) => format!("KEY:{}\r\n", key),
            DeviceCommand::RaceOn => "CMD:RACE_ON\n".to_string(),
            DeviceCommand::RaceOff => "CMD:RACE_OFF\n".to_string(),
            DeviceCommand::SetupOn => "CMD:SETUP_ON\n".to_string(),
            DeviceCommand::SetupOff => "CMD:SETUP_OFF\n".to_string(),
            DeviceCommand::SetPassword(new) => format!("CMD:SET_PASS:{}\n", new),
        }
    }
}

/// Anything outbound command lines can be written to
pub trait CommandSink {
    fn send(&mut self, line: &str) -> Result<(), RaceboxError>;

    fn send_command(&mut self, command: &DeviceCommand) -> Result<(), RaceboxError> {
        let line = command.wire();
        debug!("Sending {:?}", line.trim_end());
        self.send(&line)
    }
}

impl CommandSink for Vec<String> {
    fn send(&mut self, line: &str) -> Result<(), RaceboxError> {
        self.push(line.to_string());
        Ok(())
    }
}

/// A connected serial-over-Bluetooth link. Discovery, pairing and permission
/// handling belong to the implementation, not to this crate.
pub trait DeviceLink: CommandSink {
    fn is_connected(&self) -> bool;

    /// Bytes ready to be read without blocking
    fn available(&mut self) -> Result<usize, RaceboxError>;

    /// Read whatever is buffered, up to `available()` bytes
    fn read(&mut self) -> Result<Vec<u8>, RaceboxError>;

    fn disconnect(&mut self);
}

/// Replays a captured byte stream in fixed size chunks, one chunk per read.
/// Reports disconnected once the capture is exhausted.
#[derive(Debug, Default)]
pub struct ReplayLink {
    data: Vec<u8>,
    position: usize,
    chunk_size: usize,
    connected: bool,
    sent: Vec<String>,
}

impl ReplayLink {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data,
            position: 0,
            chunk_size: chunk_size.max(1),
            connected: true,
            sent: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Lines written to the link so far
    pub fn sent(&self) -> &[String] {
        &self.sent
    }
}

impl CommandSink for ReplayLink {
    fn send(&mut self, line: &str) -> Result<(), RaceboxError> {
        if !self.connected {
            return Err(RaceboxError::NotConnected);
        }
        self.sent.push(line.to_string());
        Ok(())
    }
}

impl DeviceLink for ReplayLink {
    fn is_connected(&self) -> bool {
        self.connected && !self.is_exhausted()
    }

    fn available(&mut self) -> Result<usize, RaceboxError> {
        if !self.connected {
            return Err(RaceboxError::NotConnected);
        }
        Ok((self.data.len() - self.position).min(self.chunk_size))
    }

    fn read(&mut self) -> Result<Vec<u8>, RaceboxError> {
        let count = self.available()?;
        let chunk = self.data[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(chunk)
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            DeviceCommand::Authenticate("1234".to_string()).wire(),
            "KEY:1234\r\n"
        );
        assert_eq!(DeviceCommand::RaceOn.wire(), "CMD:RACE_ON\n");
        assert_eq!(DeviceCommand::RaceOff.wire(), "CMD:RACE_OFF\n");
        assert_eq!(DeviceCommand::SetupOn.wire(), "CMD:SETUP_ON\n");
        assert_eq!(DeviceCommand::SetupOff.wire(), "CMD:SETUP_OFF\n");
        assert_eq!(
            DeviceCommand::SetPassword("9999".to_string()).wire(),
            "CMD:SET_PASS:9999\n"
        );
    }

    #[test]
    fn test_vec_sink_captures_lines() {
        let mut sink: Vec<String> = Vec::new();
        sink.send_command(&DeviceCommand::RaceOn).unwrap();
        sink.send_command(&DeviceCommand::SetupOff).unwrap();
        assert_eq!(sink, vec!["CMD:RACE_ON\n", "CMD:SETUP_OFF\n"]);
    }

    #[test]
    fn test_replay_link_chunks_and_exhausts() {
        let mut link = ReplayLink::new(b"$HB,80,1,9\n".to_vec(), 4);
        let mut received = Vec::new();
        while link.is_connected() {
            assert!(link.available().unwrap() <= 4);
            received.extend(link.read().unwrap());
        }
        assert_eq!(received, b"$HB,80,1,9\n");
        assert_eq!(link.available().unwrap(), 0);
    }

    #[test]
    fn test_replay_link_after_disconnect() {
        let mut link = ReplayLink::new(b"$HB".to_vec(), 16);
        link.send_command(&DeviceCommand::RaceOn).unwrap();
        link.disconnect();

        assert!(!link.is_connected());
        assert!(link.read().is_err());
        assert!(matches!(
            link.send_command(&DeviceCommand::RaceOff),
            Err(RaceboxError::NotConnected)
        ));
        assert_eq!(link.sent(), ["CMD:RACE_ON\n"]);
    }
}
