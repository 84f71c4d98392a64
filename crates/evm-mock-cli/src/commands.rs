use crate::cli::{
    SelectorsArgs,
    SlotArgs,
};
use color_eyre::{
    Result,
    eyre::WrapErr,
};
use evm_mock::{
    InterfaceSpec,
    StorageLayout,
    Value,
    primitives::U256,
    storage::codec,
};
use serde_json::{
    Value as Json,
    json,
};
use std::path::Path;
use tracing::debug;

/// Where a storage variable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub variable: String,
    pub slot: U256,
    pub offset: u8,
    pub ty: String,
}

impl SlotReport {
    pub fn to_json(&self) -> Json {
        json!({
            "variable": self.variable,
            "slot": format!("{:#066x}", self.slot),
            "offset": self.offset,
            "type": self.ty,
        })
    }

    pub fn to_text(&self) -> String {
        format!(
            "{} ({})\n  slot:   {:#066x}\n  offset: {}",
            self.variable, self.ty, self.slot, self.offset
        )
    }
}

pub fn slot(args: &SlotArgs) -> Result<SlotReport> {
    let json = std::fs::read_to_string(&args.layout)
        .wrap_err_with(|| format!("failed to read layout {}", args.layout.display()))?;
    let layout = StorageLayout::from_json(&json)?;
    let path: Vec<Value> = args.path.iter().map(|step| Value::from(step.as_str())).collect();

    let location = codec::locate(&layout, layout.get(&args.variable)?, &path)?;
    debug!(
        target: "evm-mock::cli",
        variable = %args.variable,
        bounds = location.bounds.len(),
        "Located variable"
    );

    let mut variable = args.variable.clone();
    for step in &args.path {
        variable.push_str(&format!("[{step}]"));
    }
    Ok(SlotReport {
        variable,
        slot: location.slot,
        offset: location.offset,
        ty: layout.type_of(&location.ty)?.label.clone(),
    })
}

/// One function of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorEntry {
    pub signature: String,
    pub selector: String,
}

/// Reads `source` from disk when it names a file, otherwise uses it as is.
fn load_interface(source: &str) -> Result<InterfaceSpec> {
    let path = Path::new(source);
    let text = if path.is_file() {
        std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read interface {}", path.display()))?
    } else {
        source.to_string()
    };
    Ok(InterfaceSpec::resolve(&text)?)
}

pub fn selectors(args: &SelectorsArgs) -> Result<Vec<SelectorEntry>> {
    let interface = load_interface(&args.abi)?;
    let mut entries: Vec<SelectorEntry> = interface
        .functions()
        .map(|function| SelectorEntry {
            signature: function.signature(),
            selector: function.selector().to_string(),
        })
        .collect();
    entries.sort_by(|a, b| a.signature.cmp(&b.signature));
    Ok(entries)
}

pub fn selectors_json(entries: &[SelectorEntry]) -> Json {
    Json::Array(
        entries
            .iter()
            .map(|entry| json!({"signature": entry.signature, "selector": entry.selector}))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Write,
        path::PathBuf,
    };

    const LAYOUT: &str = r#"{
        "storage": [
            {"label": "owner", "offset": 0, "slot": "0", "type": "t_address"},
            {"label": "paused", "offset": 20, "slot": "0", "type": "t_bool"},
            {"label": "balances", "offset": 0, "slot": "1", "type": "t_mapping(t_uint256,t_uint256)"}
        ],
        "types": {
            "t_address": {"encoding": "inplace", "label": "address", "numberOfBytes": "20"},
            "t_bool": {"encoding": "inplace", "label": "bool", "numberOfBytes": "1"},
            "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
            "t_mapping(t_uint256,t_uint256)": {
                "encoding": "mapping", "label": "mapping(uint256 => uint256)", "numberOfBytes": "32",
                "key": "t_uint256", "value": "t_uint256"
            }
        }
    }"#;

    fn layout_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LAYOUT.as_bytes()).unwrap();
        file
    }

    fn slot_args(layout: PathBuf, variable: &str, path: &[&str]) -> SlotArgs {
        SlotArgs {
            layout,
            variable: variable.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_packed_variable_offset() {
        let file = layout_file();
        let report = slot(&slot_args(file.path().to_path_buf(), "paused", &[])).unwrap();
        assert_eq!(report.slot, U256::ZERO);
        assert_eq!(report.offset, 20);
        assert_eq!(report.ty, "bool");
    }

    #[test]
    fn test_mapping_slot_from_string_key() {
        let file = layout_file();
        let report = slot(&slot_args(file.path().to_path_buf(), "balances", &["5"])).unwrap();

        let mut preimage = [0u8; 64];
        preimage[31] = 5;
        preimage[63] = 1;
        let expected = U256::from_be_bytes(evm_mock::primitives::keccak256(preimage).0);
        assert_eq!(report.slot, expected);
        assert_eq!(report.variable, "balances[5]");
        assert_eq!(report.to_json()["type"], "uint256");
    }

    #[test]
    fn test_unknown_variable_fails() {
        let file = layout_file();
        assert!(slot(&slot_args(file.path().to_path_buf(), "missing", &[])).is_err());
    }

    #[test]
    fn test_selectors_from_inline_signatures() {
        let args = SelectorsArgs {
            abi: "function transfer(address to, uint256 amount) returns (bool)\nfunction totalSupply() view returns (uint256)".to_string(),
        };
        let entries = selectors(&args).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].signature, "totalSupply()");
        assert_eq!(entries[0].selector, "0x18160ddd");
        assert_eq!(entries[1].selector, "0xa9059cbb");
        assert_eq!(selectors_json(&entries)[1]["signature"], "transfer(address,uint256)");
    }
}
