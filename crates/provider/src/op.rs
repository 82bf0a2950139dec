// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

//! Bindings for the OP stack fee oracle predeploys

use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};

/// Address of the `L1Block` predeploy holding the attributes of the latest L1 block
pub const L1_BLOCK_ADDRESS: Address = address!("4200000000000000000000000000000000000015");

/// Address of the `GasPriceOracle` predeploy
pub const GAS_PRICE_ORACLE_ADDRESS: Address = address!("420000000000000000000000000000000000000F");

/// Depositor account, the only sender allowed to update `L1Block` and activate Ecotone
pub const DEPOSITOR_ADDRESS: Address = address!("DeaDDEaDDeAdDeAdDEAdDEaddeAddEAdDEAd0001");

sol! {
    interface GasPriceOracle {
        function isEcotone() external view returns (bool);
        function setEcotone() external;
        function baseFeeScalar() external view returns (uint32);
        function blobBaseFeeScalar() external view returns (uint32);
        function getL1Fee(bytes memory _data) external view returns (uint256);
    }

    interface L1Block {
        function setL1BlockValuesEcotone() external;
    }
}

/// Values written by the per block L1 attributes system transaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L1BlockValues {
    /// Scalar applied to the L1 base fee
    pub base_fee_scalar: u32,
    /// Scalar applied to the L1 blob base fee
    pub blob_base_fee_scalar: u32,
    /// Position of the L2 block within the epoch
    pub sequence_number: u64,
    /// L1 block timestamp
    pub timestamp: u64,
    /// L1 block number
    pub number: u64,
    /// L1 base fee
    pub base_fee: U256,
    /// L1 blob base fee
    pub blob_base_fee: U256,
    /// L1 block hash
    pub hash: B256,
    /// Batcher hash
    pub batcher_hash: B256,
}

impl L1BlockValues {
    /// Calldata for `setL1BlockValuesEcotone`.
    ///
    /// The function takes no ABI arguments, the values are tightly packed after the selector.
    pub fn ecotone_calldata(&self) -> Bytes {
        let mut buf = Vec::with_capacity(164);
        buf.extend_from_slice(&L1Block::setL1BlockValuesEcotoneCall::SELECTOR);
        buf.extend_from_slice(&self.base_fee_scalar.to_be_bytes());
        buf.extend_from_slice(&self.blob_base_fee_scalar.to_be_bytes());
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.base_fee.to_be_bytes::<32>());
        buf.extend_from_slice(&self.blob_base_fee.to_be_bytes::<32>());
        buf.extend_from_slice(self.hash.as_slice());
        buf.extend_from_slice(self.batcher_hash.as_slice());
        buf.into()
    }
}
