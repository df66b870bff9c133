use crate::hash::NodeId;

/// Parameters used to build and validate the genesis block, equivalent to
/// the group's `genesis.json`. `group_mark` is the canonical string form;
/// it is embedded verbatim as `extra_data[0]` on the genesis header so a
/// peer can detect a group configuration mismatch just by comparing
/// genesis blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisBlockParam {
    pub group_mark: String,
    pub tx_count_limit: u64,
    pub tx_gas_limit: u64,
    pub miner_list: Vec<NodeId>,
    pub observer_list: Vec<NodeId>,
    pub consensus_type: String,
    pub storage_type: String,
    pub state_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GroupMarkError {
    #[error("group mark has {got} fields, expected 7: {raw}")]
    WrongFieldCount { raw: String, got: usize },
}

/// The group mark is `-`-delimited with 7 fields; fields 2, 3, 4 (0-indexed)
/// carry the consensus type, storage type, and state type respectively.
/// The remaining fields (genesis mark proper, tx count limit, tx gas
/// limit) are carried as dedicated `GenesisBlockParam` fields rather than
/// re-parsed out of the mark, but a mismatch in the mark's shape alone is
/// enough to reject a foreign group's genesis block.
pub fn parse_group_mark(raw: &str) -> Result<GroupMarkFields, GroupMarkError> {
    let fields: Vec<&str> = raw.split('-').collect();
    if fields.len() != 7 {
        return Err(GroupMarkError::WrongFieldCount {
            raw: raw.to_string(),
            got: fields.len(),
        });
    }
    Ok(GroupMarkFields {
        consensus_type: fields[2].to_string(),
        storage_type: fields[3].to_string(),
        state_type: fields[4].to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMarkFields {
    pub consensus_type: String,
    pub storage_type: String,
    pub state_type: String,
}

impl GenesisBlockParam {
    pub fn group_mark_fields(&self) -> Result<GroupMarkFields, GroupMarkError> {
        parse_group_mark(&self.group_mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_group_mark() {
        let mark = "genesis-mark-pbft-AMOPDB-mpt-1000-300000000";
        let fields = parse_group_mark(mark).unwrap();
        assert_eq!(fields.consensus_type, "pbft");
        assert_eq!(fields.storage_type, "AMOPDB");
        assert_eq!(fields.state_type, "mpt");
    }

    #[test]
    fn rejects_malformed_group_mark() {
        let err = parse_group_mark("too-few-fields").unwrap_err();
        assert!(matches!(err, GroupMarkError::WrongFieldCount { got: 3, .. }));
    }
}
