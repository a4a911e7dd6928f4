//! # Batch Validation Guards
//!
//! Structural rules checked against cluster metadata after preprocessing and
//! before any prerequisite or replication work. A violation rejects the
//! *whole batch*: these conditions indicate a malformed client request, and
//! partial acceptance would hide the bug from the client.

use crate::cluster::ClusterMetadata;
use crate::error::{Error, Result};
use crate::types::{BatchRequest, OpType, WriteItem};

/// Runs all whole-batch guards.
pub fn validate_batch(batch: &BatchRequest, metadata: &ClusterMetadata) -> Result<()> {
    for (_, item) in batch.live() {
        prohibit_append_writes_to_backing_indices(item, metadata)?;
        prohibit_custom_routing_on_data_streams(item, metadata)?;
    }
    Ok(())
}

/// Append writes must address the data stream, never a backing index
/// directly: the data stream abstraction owns which generation receives
/// appends. Targeted updates and deletes of a specific document in a specific
/// generation remain legal, as does an INDEX carrying either half of a
/// compare-and-set precondition (it names an existing document rather than
/// appending).
fn prohibit_append_writes_to_backing_indices(
    item: &WriteItem,
    metadata: &ClusterMetadata,
) -> Result<()> {
    let is_append = match item.op_type {
        OpType::Create => true,
        OpType::Index => item.if_seq_no.is_none() && item.if_primary_term.is_none(),
        OpType::Update | OpType::Delete => false,
    };
    if !is_append {
        return Ok(());
    }
    let Some(index) = metadata.index(item.target.as_str()) else {
        return Ok(());
    };
    if let Some(parent) = &index.parent_data_stream {
        return Err(Error::invalid_request(format!(
            "append write targets backing index '{}' directly; \
             address the data stream '{}' instead",
            item.target, parent
        )));
    }
    Ok(())
}

/// A custom routing key on a data stream write is rejected unless the data
/// stream explicitly allows it: routing would bypass the stream's document
/// distribution. Writes addressed at a concrete backing index may route.
fn prohibit_custom_routing_on_data_streams(
    item: &WriteItem,
    metadata: &ClusterMetadata,
) -> Result<()> {
    if item.routing.is_none() {
        return Ok(());
    }
    let Some(data_stream) = metadata.data_stream(item.target.as_str()) else {
        return Ok(());
    };
    if !data_stream.allow_custom_routing {
        return Err(Error::invalid_request(format!(
            "custom routing is not allowed on data stream '{}'",
            data_stream.name
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::DataStreamState;

    fn metadata() -> ClusterMetadata {
        ClusterMetadata::new()
            .with_data_stream(DataStreamState::new("logs"))
            .with_data_stream(DataStreamState::new("routed").with_allow_custom_routing())
    }

    #[test]
    fn test_append_to_backing_index_is_rejected() {
        let batch = BatchRequest::new(vec![WriteItem::create(
            ".ds-logs-000001",
            b"{}".to_vec(),
        )]);
        let err = validate_batch(&batch, &metadata()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { reason } if reason.contains("logs")));
    }

    #[test]
    fn test_index_without_cas_to_backing_index_is_rejected() {
        let batch =
            BatchRequest::new(vec![WriteItem::index(".ds-logs-000001", b"{}".to_vec())]);
        assert!(validate_batch(&batch, &metadata()).is_err());
    }

    #[test]
    fn test_targeted_writes_to_backing_index_are_allowed() {
        let batch = BatchRequest::new(vec![
            WriteItem::index(".ds-logs-000001", b"{}".to_vec())
                .with_id("d1")
                .with_cas(7, 1),
            WriteItem::update(".ds-logs-000001", b"{}".to_vec()).with_id("d1"),
            WriteItem::delete(".ds-logs-000001").with_id("d1"),
        ]);
        assert!(validate_batch(&batch, &metadata()).is_ok());
    }

    #[test]
    fn test_index_with_either_cas_half_is_not_an_append() {
        let mut with_seq = WriteItem::index(".ds-logs-000001", b"{}".to_vec()).with_id("d1");
        with_seq.if_seq_no = Some(7);
        let mut with_term = WriteItem::index(".ds-logs-000001", b"{}".to_vec()).with_id("d2");
        with_term.if_primary_term = Some(1);
        let batch = BatchRequest::new(vec![with_seq, with_term]);
        assert!(validate_batch(&batch, &metadata()).is_ok());
    }

    #[test]
    fn test_append_to_the_data_stream_itself_is_allowed() {
        let batch = BatchRequest::new(vec![WriteItem::create("logs", b"{}".to_vec())]);
        assert!(validate_batch(&batch, &metadata()).is_ok());
    }

    #[test]
    fn test_custom_routing_on_data_stream_is_rejected() {
        let batch = BatchRequest::new(vec![
            WriteItem::create("logs", b"{}".to_vec()).with_routing("tenant-a")
        ]);
        let err = validate_batch(&batch, &metadata()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { reason } if reason.contains("routing")));
    }

    #[test]
    fn test_custom_routing_allowed_when_stream_opts_in() {
        let batch = BatchRequest::new(vec![
            WriteItem::create("routed", b"{}".to_vec()).with_routing("tenant-a")
        ]);
        assert!(validate_batch(&batch, &metadata()).is_ok());
    }

    #[test]
    fn test_routing_on_plain_index_is_allowed() {
        let batch = BatchRequest::new(vec![
            WriteItem::index("plain", b"{}".to_vec()).with_routing("tenant-a")
        ]);
        assert!(validate_batch(&batch, &metadata()).is_ok());
    }

    #[test]
    fn test_one_bad_item_rejects_the_whole_batch() {
        let batch = BatchRequest::new(vec![
            WriteItem::index("plain", b"{}".to_vec()),
            WriteItem::create(".ds-logs-000001", b"{}".to_vec()),
        ]);
        assert!(validate_batch(&batch, &metadata()).is_err());
    }
}
