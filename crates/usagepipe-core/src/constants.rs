//! Well-known stream keys and line-format constants.

/// Separator between the stream key and the payload on one usage line.
pub const STREAM_KEY_SEPARATOR: char = '\t';

/// Separator between payload tokens.
pub const PAYLOAD_SEPARATOR: &str = "--";

/// Token that decodes to an absent value.
pub const NULL_TOKEN: &str = "null";

pub const REQUEST_STREAM: &str = "org.wso2.apimgt.statistics.request:3.0.0";
pub const RESPONSE_STREAM: &str = "org.wso2.apimgt.statistics.response:3.0.0";
pub const EXECUTION_TIME_STREAM: &str = "org.wso2.apimgt.statistics.execution.time:3.0.0";
pub const FAULT_STREAM: &str = "org.wso2.apimgt.statistics.fault:3.0.0";
pub const THROTTLE_STREAM: &str = "org.wso2.apimgt.statistics.throttle:3.0.0";

/// Streams that must all be resolvable before usage publishing is enabled.
pub const REQUIRED_STREAMS: [&str; 5] = [
    REQUEST_STREAM,
    RESPONSE_STREAM,
    EXECUTION_TIME_STREAM,
    FAULT_STREAM,
    THROTTLE_STREAM,
];
