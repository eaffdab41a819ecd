use mavlink::common::{MavMissionResult, MavResult};
use mavlink::error::{MessageReadError, MessageWriteError};

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// The connection string could not be opened. The String contains the reason.
    ConnectionError(String),
    /// I/O error on the vehicle link.
    Io(std::io::Error),
    /// A command was sent but the autopilot rejected it.
    CommandRejected(MavResult),
    /// The autopilot refused a mission transfer.
    MissionRefused(MavMissionResult),
    /// Mission protocol error. The String contains the reason.
    MissionError(String),
    /// An argument is out of its valid range. The String contains the reason.
    InvalidArgument(String),
    /// Offboard mode was started without a setpoint being set first.
    NoSetpointSet,
    /// The operation needs the vehicle position but none was received yet.
    PositionUnknown,
    /// Operation timed out waiting for an answer from the vehicle.
    Timeout,
    /// The vehicle link stopped delivering messages.
    LinkLost,
    /// The Vehicle object is currently disconnected.
    Disconnected,
    /// Error with the async runtime or internal tasks.
    SystemError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ConnectionError(reason) => write!(f, "Connection error: {}", reason),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::CommandRejected(result) => write!(f, "Command rejected: {:?}", result),
            Error::MissionRefused(result) => write!(f, "Mission refused: {:?}", result),
            Error::MissionError(reason) => write!(f, "Mission protocol error: {}", reason),
            Error::InvalidArgument(reason) => write!(f, "Invalid argument: {}", reason),
            Error::NoSetpointSet => write!(f, "No setpoint set before starting offboard mode"),
            Error::PositionUnknown => write!(f, "Vehicle position not known yet"),
            Error::Timeout => write!(f, "Timed out waiting for the vehicle"),
            Error::LinkLost => write!(f, "Vehicle link lost"),
            Error::Disconnected => write!(f, "Disconnected"),
            Error::SystemError(reason) => write!(f, "System error: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<MessageWriteError> for Error {
    fn from(error: MessageWriteError) -> Self {
        match error {
            MessageWriteError::Io(e) => Self::Io(e),
        }
    }
}

impl From<MessageReadError> for Error {
    fn from(error: MessageReadError) -> Self {
        match error {
            MessageReadError::Io(e) => Self::Io(e),
            MessageReadError::Parse(e) => Self::ConnectionError(format!("{:?}", e)),
        }
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        Self::Disconnected
    }
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(_: flume::SendError<T>) -> Self {
        Self::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_operation() {
        let error = Error::CommandRejected(MavResult::MAV_RESULT_DENIED);
        assert!(format!("{}", error).contains("MAV_RESULT_DENIED"));

        let error = Error::MissionRefused(MavMissionResult::MAV_MISSION_NO_SPACE);
        assert!(format!("{}", error).contains("MAV_MISSION_NO_SPACE"));
    }

    #[test]
    fn channel_errors_map_to_disconnected() {
        let error: Error = flume::RecvError::Disconnected.into();
        assert!(matches!(error, Error::Disconnected));
    }
}
