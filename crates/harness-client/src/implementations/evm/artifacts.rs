//! Compiled contract artifacts and ABI conversion.
//!
//! Artifacts are the JSON files a Hardhat or Foundry build leaves behind; the
//! harness only needs their `abi` and creation `bytecode`. Events from every
//! loaded artifact are indexed by selector so receipt logs can be decoded no
//! matter which contract emitted them.

use crate::ClientError;
use alloy_dyn_abi::{DynSolType, DynSolValue, EventExt, FunctionExt, Specifier};
use alloy_json_abi::{Event, Function, JsonAbi, Param};
use alloy_primitives::{Address, Bytes, LogData, B256};
use harness_types::{EventRecord, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// A compiled contract.
#[derive(Debug, Clone)]
pub struct Artifact {
	pub name: String,
	pub abi: JsonAbi,
	/// Creation bytecode; empty for interfaces and abstract contracts.
	pub bytecode: Bytes,
}

#[derive(Deserialize)]
struct ArtifactFile {
	#[serde(rename = "contractName", default)]
	contract_name: Option<String>,
	abi: JsonAbi,
	#[serde(default)]
	bytecode: serde_json::Value,
}

impl Artifact {
	/// Parses an artifact document. `fallback_name` is used when the file
	/// carries no `contractName` (Foundry output).
	pub fn from_json(json: &str, fallback_name: &str) -> Result<Self, ClientError> {
		let file: ArtifactFile = serde_json::from_str(json)
			.map_err(|e| ClientError::Decoding(format!("artifact {}: {}", fallback_name, e)))?;

		// Hardhat writes a hex string, Foundry an object with the hex under `object`.
		let code = match &file.bytecode {
			serde_json::Value::String(code) => code.as_str(),
			serde_json::Value::Object(map) => {
				map.get("object").and_then(|v| v.as_str()).unwrap_or("")
			},
			_ => "",
		};
		let bytecode = hex::decode(code.trim_start_matches("0x"))
			.map(Bytes::from)
			.map_err(|e| ClientError::Decoding(format!("bytecode of {}: {}", fallback_name, e)))?;

		Ok(Self {
			name: file.contract_name.unwrap_or_else(|| fallback_name.to_string()),
			abi: file.abi,
			bytecode,
		})
	}
}

/// All artifacts available to a client, by contract name.
#[derive(Debug, Default)]
pub struct ArtifactStore {
	artifacts: HashMap<String, Artifact>,
	events: HashMap<B256, Vec<Event>>,
}

impl ArtifactStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Loads every artifact JSON found under `dir`, recursively.
	///
	/// Build metadata files (`*.dbg.json`, build-info) and JSON files without
	/// an `abi` are skipped.
	pub fn load_dir(dir: &Path) -> Result<Self, ClientError> {
		let mut store = Self::new();
		store.load_recursive(dir)?;
		tracing::debug!(
			dir = %dir.display(),
			artifacts = store.artifacts.len(),
			"Loaded contract artifacts"
		);
		Ok(store)
	}

	fn load_recursive(&mut self, dir: &Path) -> Result<(), ClientError> {
		let entries = std::fs::read_dir(dir).map_err(|e| {
			ClientError::Configuration(format!("Cannot read {}: {}", dir.display(), e))
		})?;

		for entry in entries {
			let path = entry
				.map_err(|e| ClientError::Configuration(e.to_string()))?
				.path();
			if path.is_dir() {
				if path.file_name().is_some_and(|name| name == "build-info") {
					continue;
				}
				self.load_recursive(&path)?;
				continue;
			}

			let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
				continue;
			};
			if !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
				continue;
			}
			let Ok(content) = std::fs::read_to_string(&path) else {
				continue;
			};
			let stem = file_name.trim_end_matches(".json");
			match Artifact::from_json(&content, stem) {
				Ok(artifact) => self.insert(artifact),
				Err(e) => {
					tracing::trace!(
						file = %path.display(),
						error = %e,
						"Skipping non-artifact JSON"
					)
				},
			}
		}
		Ok(())
	}

	pub fn insert(&mut self, artifact: Artifact) {
		for event in artifact.abi.events().filter(|event| !event.anonymous) {
			let known = self.events.entry(event.selector()).or_default();
			if !known.contains(event) {
				known.push(event.clone());
			}
		}
		self.artifacts.insert(artifact.name.clone(), artifact);
	}

	pub fn len(&self) -> usize {
		self.artifacts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.artifacts.is_empty()
	}

	pub fn get(&self, name: &str) -> Result<&Artifact, ClientError> {
		self.artifacts
			.get(name)
			.ok_or_else(|| ClientError::UnknownContract(name.to_string()))
	}

	/// Finds the function `method` of `contract` taking `arg_count` arguments.
	pub fn function(
		&self,
		contract: &str,
		method: &str,
		arg_count: usize,
	) -> Result<&Function, ClientError> {
		let artifact = self.get(contract)?;
		let overloads = artifact.abi.function(method).ok_or_else(|| {
			ClientError::Encoding(format!("{} has no function '{}'", contract, method))
		})?;
		overloads
			.iter()
			.find(|f| f.inputs.len() == arg_count)
			.ok_or_else(|| {
				ClientError::Encoding(format!(
					"{}.{} does not take {} argument(s)",
					contract, method, arg_count
				))
			})
	}

	/// Decodes a log against every known event with a matching selector.
	///
	/// Logs no artifact describes become an [`EventRecord`] tagged
	/// [`EventRecord::UNKNOWN_TAG`] with no fields.
	pub fn decode_log(&self, address: Address, data: &LogData) -> EventRecord {
		let candidates = data
			.topics()
			.first()
			.and_then(|selector| self.events.get(selector));

		for event in candidates.into_iter().flatten() {
			let Ok(decoded) = event.decode_log(data, true) else {
				continue;
			};
			let mut indexed = decoded.indexed.into_iter();
			let mut body = decoded.body.into_iter();
			let mut record = EventRecord::new(event.name.clone(), address);
			for input in &event.inputs {
				let value = if input.indexed {
					indexed.next()
				} else {
					body.next()
				};
				if let Some(value) = value {
					record = record.with_field(input.name.clone(), to_value(value));
				}
			}
			return record;
		}

		EventRecord::new(EventRecord::UNKNOWN_TAG, address)
	}
}

/// Encodes plan values for the given ABI parameters.
pub fn encode_args(params: &[Param], args: &[Value]) -> Result<Vec<DynSolValue>, ClientError> {
	if params.len() != args.len() {
		return Err(ClientError::Encoding(format!(
			"expected {} argument(s), got {}",
			params.len(),
			args.len()
		)));
	}
	params
		.iter()
		.zip(args)
		.map(|(param, arg)| {
			let ty = param
				.resolve()
				.map_err(|e| ClientError::Encoding(format!("parameter '{}': {}", param.name, e)))?;
			encode_value(&ty, arg).map_err(|e| match e {
				ClientError::Encoding(msg) => {
					ClientError::Encoding(format!("parameter '{}': {}", param.name, msg))
				},
				other => other,
			})
		})
		.collect()
}

/// Converts one plan value to the ABI type, coercing through text when the
/// kinds differ (e.g. a decimal string for a `uint256`).
pub fn encode_value(ty: &DynSolType, value: &Value) -> Result<DynSolValue, ClientError> {
	match (ty, value) {
		(DynSolType::Address, Value::Address(address)) => Ok(DynSolValue::Address(*address)),
		(DynSolType::Uint(bits), Value::Uint(v)) => Ok(DynSolValue::Uint(*v, *bits)),
		(DynSolType::Int(bits), Value::Int(v)) => Ok(DynSolValue::Int(*v, *bits)),
		(DynSolType::Bool, Value::Bool(b)) => Ok(DynSolValue::Bool(*b)),
		(DynSolType::Bytes, Value::Bytes(b)) => Ok(DynSolValue::Bytes(b.to_vec())),
		(DynSolType::String, other) => Ok(DynSolValue::String(other.to_string())),
		(ty, other) => ty.coerce_str(&other.to_abi_text()).map_err(|e| {
			ClientError::Encoding(format!(
				"cannot use '{}' as {}: {}",
				other,
				ty.sol_type_name(),
				e
			))
		}),
	}
}

/// Decodes the return data of a read call into plan values.
pub fn decode_output(function: &Function, output: &[u8]) -> Result<Vec<Value>, ClientError> {
	let decoded = function
		.abi_decode_output(output, true)
		.map_err(|e| ClientError::Decoding(format!("{}: {}", function.name, e)))?;
	Ok(decoded.into_iter().map(to_value).collect())
}

/// Converts a decoded ABI value into a plan value.
pub fn to_value(value: DynSolValue) -> Value {
	match value {
		DynSolValue::Uint(v, _) => Value::Uint(v),
		DynSolValue::Int(v, _) => Value::Int(v),
		DynSolValue::Address(a) => Value::Address(a),
		DynSolValue::Bool(b) => Value::Bool(b),
		DynSolValue::String(s) => Value::String(s),
		DynSolValue::Bytes(b) => Value::Bytes(Bytes::from(b)),
		DynSolValue::FixedBytes(word, size) => Value::Bytes(Bytes::copy_from_slice(&word[..size])),
		other => Value::String(format!("{:?}", other)),
	}
}
