//! Contract models run by the simulated chain.

use crate::ClientError;
use alloy_primitives::{Address, U256};
use harness_types::{EventRecord, Value, ValueKind};
use std::collections::HashMap;

/// Why a simulated call reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revert(pub String);

/// Result of executing a call: either emitted events or a revert.
pub type Execution = Result<Vec<EventRecord>, Revert>;

/// A deployed contract instance.
#[derive(Debug, Clone)]
pub enum ContractModel {
	AccessNft(AccessNft),
	SimpleStorage(SimpleStorage),
}

impl ContractModel {
	/// Instantiates the named contract. Both models take no constructor arguments.
	pub fn deploy(name: &str, deployer: Address, args: &[Value]) -> Result<Self, ClientError> {
		let model = match name {
			AccessNft::NAME => ContractModel::AccessNft(AccessNft::new(deployer)),
			SimpleStorage::NAME => ContractModel::SimpleStorage(SimpleStorage::new(deployer)),
			other => return Err(ClientError::UnknownContract(other.to_string())),
		};
		if !args.is_empty() {
			return Err(ClientError::Encoding(format!(
				"{} constructor takes no arguments, got {}",
				name,
				args.len()
			)));
		}
		Ok(model)
	}

	pub fn name(&self) -> &'static str {
		match self {
			ContractModel::AccessNft(_) => AccessNft::NAME,
			ContractModel::SimpleStorage(_) => SimpleStorage::NAME,
		}
	}

	/// Checks that `method` exists with this arity, as ABI encoding would.
	pub fn check_call(&self, method: &str, args: &[Value]) -> Result<(), ClientError> {
		let arities: &[usize] = match (self, method) {
			(ContractModel::AccessNft(_), "mint") => &[1, 2],
			(ContractModel::SimpleStorage(_), "set") => &[1],
			_ => {
				return Err(ClientError::Encoding(format!(
					"{} has no function '{}'",
					self.name(),
					method
				)))
			},
		};
		if !arities.contains(&args.len()) {
			return Err(ClientError::Encoding(format!(
				"{}.{} does not take {} argument(s)",
				self.name(),
				method,
				args.len()
			)));
		}
		Ok(())
	}

	pub fn execute(
		&mut self,
		this: Address,
		sender: Address,
		method: &str,
		args: &[Value],
	) -> Result<Execution, ClientError> {
		match self {
			ContractModel::AccessNft(nft) => nft.execute(this, sender, method, args),
			ContractModel::SimpleStorage(storage) => storage.execute(this, sender, method, args),
		}
	}

	pub fn read(&self, method: &str, args: &[Value]) -> Result<Vec<Value>, ClientError> {
		match self {
			ContractModel::AccessNft(nft) => nft.read(method, args),
			ContractModel::SimpleStorage(storage) => storage.read(method, args),
		}
	}
}

fn arg(args: &[Value], index: usize, kind: ValueKind) -> Result<Value, ClientError> {
	let value = args.get(index).ok_or_else(|| {
		ClientError::Encoding(format!("missing argument {}", index))
	})?;
	value
		.coerce(kind)
		.map_err(|e| ClientError::Encoding(e.to_string()))
}

fn arg_address(args: &[Value], index: usize) -> Result<Address, ClientError> {
	match arg(args, index, ValueKind::Address)? {
		Value::Address(address) => Ok(address),
		other => Err(ClientError::Encoding(format!("{} is not an address", other))),
	}
}

fn arg_uint(args: &[Value], index: usize) -> Result<U256, ClientError> {
	match arg(args, index, ValueKind::Uint)? {
		Value::Uint(v) => Ok(v),
		other => Err(ClientError::Encoding(format!("{} is not a uint256", other))),
	}
}

fn no_args(method: &str, args: &[Value]) -> Result<(), ClientError> {
	if args.is_empty() {
		Ok(())
	} else {
		Err(ClientError::Encoding(format!("{} takes no arguments", method)))
	}
}

fn invalid_token(token_id: &U256) -> ClientError {
	ClientError::Rejected(format!("execution reverted: invalid token ID {}", token_id))
}

/// Owner-mintable NFT with per-token URIs. Token ids start at 1.
#[derive(Debug, Clone)]
pub struct AccessNft {
	owner: Address,
	next_token_id: U256,
	owners: HashMap<U256, Address>,
	uris: HashMap<U256, String>,
	balances: HashMap<Address, U256>,
}

impl AccessNft {
	pub const NAME: &'static str = "AccessNFT";
	const TOKEN_NAME: &'static str = "AccessNFT";
	const TOKEN_SYMBOL: &'static str = "ANFT";

	pub fn new(owner: Address) -> Self {
		Self {
			owner,
			next_token_id: U256::from(1u64),
			owners: HashMap::new(),
			uris: HashMap::new(),
			balances: HashMap::new(),
		}
	}

	fn execute(
		&mut self,
		this: Address,
		sender: Address,
		method: &str,
		args: &[Value],
	) -> Result<Execution, ClientError> {
		match method {
			"mint" => {
				let to = arg_address(args, 0)?;
				let uri = match args.get(1) {
					Some(uri) => uri.to_string(),
					None => String::new(),
				};
				if sender != self.owner {
					return Ok(Err(Revert("Ownable: caller is not the owner".to_string())));
				}
				if to == Address::ZERO {
					return Ok(Err(Revert("mint to the zero address".to_string())));
				}

				let token_id = self.next_token_id;
				self.next_token_id += U256::from(1u64);
				self.owners.insert(token_id, to);
				self.uris.insert(token_id, uri);
				*self.balances.entry(to).or_default() += U256::from(1u64);

				Ok(Ok(vec![EventRecord::new("Transfer", this)
					.with_field("from", Address::ZERO)
					.with_field("to", to)
					.with_field("tokenId", token_id)]))
			},
			other => Err(ClientError::Encoding(format!(
				"{} has no function '{}'",
				Self::NAME,
				other
			))),
		}
	}

	fn read(&self, method: &str, args: &[Value]) -> Result<Vec<Value>, ClientError> {
		let value = match method {
			"name" => {
				no_args(method, args)?;
				Value::from(Self::TOKEN_NAME)
			},
			"symbol" => {
				no_args(method, args)?;
				Value::from(Self::TOKEN_SYMBOL)
			},
			"owner" => {
				no_args(method, args)?;
				Value::Address(self.owner)
			},
			"nextTokenId" => {
				no_args(method, args)?;
				Value::Uint(self.next_token_id)
			},
			"ownerOf" => {
				let token_id = arg_uint(args, 0)?;
				let owner = self
					.owners
					.get(&token_id)
					.ok_or_else(|| invalid_token(&token_id))?;
				Value::Address(*owner)
			},
			"tokenURI" => {
				let token_id = arg_uint(args, 0)?;
				let uri = self
					.uris
					.get(&token_id)
					.ok_or_else(|| invalid_token(&token_id))?;
				Value::from(uri.as_str())
			},
			"balanceOf" => {
				let holder = arg_address(args, 0)?;
				Value::Uint(self.balances.get(&holder).copied().unwrap_or_default())
			},
			other => {
				return Err(ClientError::Encoding(format!(
					"{} has no function '{}'",
					Self::NAME,
					other
				)))
			},
		};
		Ok(vec![value])
	}
}

/// Single stored value, writable by anyone.
#[derive(Debug, Clone)]
pub struct SimpleStorage {
	owner: Address,
	value: U256,
}

impl SimpleStorage {
	pub const NAME: &'static str = "SimpleStorage";

	pub fn new(owner: Address) -> Self {
		Self {
			owner,
			value: U256::ZERO,
		}
	}

	fn execute(
		&mut self,
		this: Address,
		sender: Address,
		method: &str,
		args: &[Value],
	) -> Result<Execution, ClientError> {
		match method {
			"set" => {
				let new_value = arg_uint(args, 0)?;
				let old_value = std::mem::replace(&mut self.value, new_value);
				Ok(Ok(vec![EventRecord::new("ValueChanged", this)
					.with_field("oldValue", old_value)
					.with_field("newValue", new_value)
					.with_field("changedBy", sender)]))
			},
			other => Err(ClientError::Encoding(format!(
				"{} has no function '{}'",
				Self::NAME,
				other
			))),
		}
	}

	fn read(&self, method: &str, args: &[Value]) -> Result<Vec<Value>, ClientError> {
		no_args(method, args)?;
		match method {
			"get" => Ok(vec![Value::Uint(self.value)]),
			"owner" => Ok(vec![Value::Address(self.owner)]),
			other => Err(ClientError::Encoding(format!(
				"{} has no function '{}'",
				Self::NAME,
				other
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn addr(byte: u8) -> Address {
		Address::repeat_byte(byte)
	}

	#[test]
	fn test_mint_assigns_sequential_ids() {
		let mut nft = AccessNft::new(addr(1));
		let events = nft
			.execute(addr(9), addr(1), "mint", &[Value::Address(addr(2)), Value::from("ipfs://a")])
			.unwrap()
			.unwrap();
		assert_eq!(events[0].tag, "Transfer");
		assert_eq!(events[0].field("tokenId"), Some(&Value::from(1u64)));
		assert_eq!(events[0].field("from"), Some(&Value::Address(Address::ZERO)));

		nft.execute(addr(9), addr(1), "mint", &[Value::Address(addr(3))])
			.unwrap()
			.unwrap();
		assert_eq!(nft.read("nextTokenId", &[]).unwrap(), vec![Value::from(3u64)]);
		assert_eq!(
			nft.read("ownerOf", &[Value::from(1u64)]).unwrap(),
			vec![Value::Address(addr(2))]
		);
		assert_eq!(
			nft.read("tokenURI", &[Value::from("1")]).unwrap(),
			vec![Value::from("ipfs://a")]
		);
		assert_eq!(
			nft.read("balanceOf", &[Value::Address(addr(3))]).unwrap(),
			vec![Value::from(1u64)]
		);
	}

	#[test]
	fn test_mint_by_non_owner_reverts() {
		let mut nft = AccessNft::new(addr(1));
		let outcome = nft
			.execute(addr(9), addr(2), "mint", &[Value::Address(addr(2))])
			.unwrap();
		assert!(outcome.is_err());
		assert_eq!(nft.read("nextTokenId", &[]).unwrap(), vec![Value::from(1u64)]);
	}

	#[test]
	fn test_storage_emits_old_and_new_value() {
		let mut storage = SimpleStorage::new(addr(1));
		storage
			.execute(addr(9), addr(1), "set", &[Value::from(42u64)])
			.unwrap()
			.unwrap();
		let events = storage
			.execute(addr(9), addr(5), "set", &[Value::from(100u64)])
			.unwrap()
			.unwrap();
		assert_eq!(events[0].field("oldValue"), Some(&Value::from(42u64)));
		assert_eq!(events[0].field("newValue"), Some(&Value::from(100u64)));
		assert_eq!(events[0].field("changedBy"), Some(&Value::Address(addr(5))));
		assert_eq!(storage.read("get", &[]).unwrap(), vec![Value::from(100u64)]);
	}

	#[test]
	fn test_unknown_contract_and_method() {
		assert!(matches!(
			ContractModel::deploy("Vault", addr(1), &[]),
			Err(ClientError::UnknownContract(_))
		));
		let model = ContractModel::deploy("SimpleStorage", addr(1), &[]).unwrap();
		assert!(model.check_call("set", &[Value::from(1u64)]).is_ok());
		assert!(model.check_call("burn", &[]).is_err());
		assert!(model.read("balanceOf", &[]).is_err());
	}
}
