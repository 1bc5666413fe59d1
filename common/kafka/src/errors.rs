use rdkafka::error::{KafkaError, RDKafkaErrorCode};

pub const KAFKA_CLIENT_ERRORS: &str = "kafka_client_errors_total";

/// How a stage loop should react to an error surfaced by librdkafka.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Expected during normal operation (EOF, poll timeouts), nothing to do.
    Benign,
    /// Connectivity hiccup, the client reconnects on its own.
    Transient,
    /// The client cannot make progress anymore, the stage must drain.
    Fatal,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Benign => "info",
            ErrorSeverity::Transient => "warn",
            ErrorSeverity::Fatal => "fatal",
        }
    }
}

/// Classify a consumer or producer error and record it.
pub fn classify(error: &KafkaError) -> ErrorSeverity {
    let (severity, label) = match error {
        KafkaError::MessageConsumption(code) => match code {
            RDKafkaErrorCode::PartitionEOF => (ErrorSeverity::Benign, "partition_eof"),
            RDKafkaErrorCode::OperationTimedOut => (ErrorSeverity::Benign, "op_timed_out"),
            // "auto.offset.reset" will trigger a seek in coordination with the broker
            RDKafkaErrorCode::OffsetOutOfRange => {
                (ErrorSeverity::Transient, "offset_out_of_range")
            }
            _ => (ErrorSeverity::Transient, "consumer"),
        },
        KafkaError::MessageConsumptionFatal(_) => (ErrorSeverity::Fatal, "consumer"),
        KafkaError::MessageProduction(code) => match code {
            RDKafkaErrorCode::Fatal => (ErrorSeverity::Fatal, "producer_fatal"),
            RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed => {
                (ErrorSeverity::Fatal, "authorization")
            }
            RDKafkaErrorCode::Authentication => (ErrorSeverity::Fatal, "authentication"),
            _ => (ErrorSeverity::Transient, "producer"),
        },
        KafkaError::Global(code) => match code {
            RDKafkaErrorCode::AllBrokersDown => (ErrorSeverity::Transient, "all_brokers_down"),
            RDKafkaErrorCode::BrokerTransportFailure => {
                (ErrorSeverity::Transient, "broker_transport")
            }
            RDKafkaErrorCode::Authentication => (ErrorSeverity::Fatal, "authentication"),
            RDKafkaErrorCode::Fatal => (ErrorSeverity::Fatal, "global_fatal"),
            _ => (ErrorSeverity::Transient, "global"),
        },
        // The client was torn down underneath us
        KafkaError::Canceled => (ErrorSeverity::Fatal, "canceled"),
        KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => {
            (ErrorSeverity::Fatal, "client")
        }
        _ => (ErrorSeverity::Transient, "unexpected"),
    };

    metrics::counter!(
        KAFKA_CLIENT_ERRORS,
        &[("level", severity.as_str()), ("error", label)]
    )
    .increment(1);

    severity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_eof_is_benign() {
        let error = KafkaError::MessageConsumption(RDKafkaErrorCode::PartitionEOF);
        assert_eq!(classify(&error), ErrorSeverity::Benign);
    }

    #[test]
    fn test_brokers_down_is_transient() {
        let error = KafkaError::Global(RDKafkaErrorCode::AllBrokersDown);
        assert_eq!(classify(&error), ErrorSeverity::Transient);
    }

    #[test]
    fn test_fatal_errors() {
        assert_eq!(
            classify(&KafkaError::MessageConsumptionFatal(
                RDKafkaErrorCode::Authentication
            )),
            ErrorSeverity::Fatal
        );
        assert_eq!(
            classify(&KafkaError::Global(RDKafkaErrorCode::Authentication)),
            ErrorSeverity::Fatal
        );
        assert_eq!(classify(&KafkaError::Canceled), ErrorSeverity::Fatal);
        assert_eq!(
            classify(&KafkaError::MessageProduction(
                RDKafkaErrorCode::TopicAuthorizationFailed
            )),
            ErrorSeverity::Fatal
        );
    }

    #[test]
    fn test_produce_timeout_is_transient() {
        let error = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert_eq!(classify(&error), ErrorSeverity::Transient);
    }
}
