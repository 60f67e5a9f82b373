//! RPC-backed implementations of the validator's chain-facing seams.

use {
    crate::{ApprovalChecking, BalanceFetching, TokenClassifying},
    alloy_primitives::{Address, FixedBytes, U256},
    alloy_sol_types::SolCall,
    anyhow::Result,
    async_trait::async_trait,
    ethrpc::CallExecuting,
    model::order::TokenStandard,
    std::sync::Arc,
};

mod erc20 {
    alloy_sol_types::sol! {
        function balanceOf(address owner) external view returns (uint256);
    }
}

mod erc721 {
    alloy_sol_types::sol! {
        function balanceOf(address owner) external view returns (uint256);
        function getApproved(uint256 tokenId) external view returns (address);
        function isApprovedForAll(address owner, address operator) external view returns (bool);
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
    }
}

mod erc1155 {
    alloy_sol_types::sol! {
        function balanceOf(address owner, uint256 id) external view returns (uint256);
        function isApprovedForAll(address owner, address operator) external view returns (bool);
    }
}

const ERC721_INTERFACE_ID: FixedBytes<4> = FixedBytes([0x80, 0xac, 0x58, 0xcd]);
const ERC1155_INTERFACE_ID: FixedBytes<4> = FixedBytes([0xd9, 0xb6, 0x7a, 0x26]);

pub struct OnChain {
    rpc: Arc<dyn CallExecuting>,
}

impl OnChain {
    pub fn new(rpc: Arc<dyn CallExecuting>) -> Self {
        Self { rpc }
    }

    async fn supports_interface(
        &self,
        contract: Address,
        interface_id: FixedBytes<4>,
    ) -> Option<bool> {
        let call = erc721::supportsInterfaceCall { interfaceId: interface_id };
        let data = self
            .rpc
            .call(contract, call.abi_encode().into())
            .await
            .ok()?;
        erc721::supportsInterfaceCall::abi_decode_returns(&data).ok()
    }
}

#[async_trait]
impl TokenClassifying for OnChain {
    async fn classify(&self, contract: Address) -> Result<Option<TokenStandard>> {
        // Contracts without ERC-165 revert on the probe; that is "unknown
        // standard", not an error.
        if self
            .supports_interface(contract, ERC721_INTERFACE_ID)
            .await
            .unwrap_or(false)
        {
            return Ok(Some(TokenStandard::Erc721));
        }
        if self
            .supports_interface(contract, ERC1155_INTERFACE_ID)
            .await
            .unwrap_or(false)
        {
            return Ok(Some(TokenStandard::Erc1155));
        }
        Ok(None)
    }
}

#[async_trait]
impl BalanceFetching for OnChain {
    async fn erc20_balance(&self, owner: Address, token: Address) -> Result<U256> {
        let call = erc20::balanceOfCall { owner };
        let data = self.rpc.call(token, call.abi_encode().into()).await?;
        Ok(erc20::balanceOfCall::abi_decode_returns(&data)?)
    }

    async fn token_balance(
        &self,
        owner: Address,
        contract: Address,
        token_id: U256,
        standard: TokenStandard,
    ) -> Result<U256> {
        match standard {
            TokenStandard::Erc721 => {
                let call = erc721::balanceOfCall { owner };
                let data = self.rpc.call(contract, call.abi_encode().into()).await?;
                Ok(erc721::balanceOfCall::abi_decode_returns(&data)?)
            }
            TokenStandard::Erc1155 => {
                let call = erc1155::balanceOfCall {
                    owner,
                    id: token_id,
                };
                let data = self.rpc.call(contract, call.abi_encode().into()).await?;
                Ok(erc1155::balanceOfCall::abi_decode_returns(&data)?)
            }
        }
    }
}

#[async_trait]
impl ApprovalChecking for OnChain {
    async fn is_approved_for_all(
        &self,
        owner: Address,
        operator: Address,
        contract: Address,
    ) -> Result<bool> {
        let call = erc721::isApprovedForAllCall { owner, operator };
        let data = self.rpc.call(contract, call.abi_encode().into()).await?;
        Ok(erc721::isApprovedForAllCall::abi_decode_returns(&data)?)
    }

    async fn approved_for_token(
        &self,
        contract: Address,
        token_id: U256,
    ) -> Result<Option<Address>> {
        let call = erc721::getApprovedCall { tokenId: token_id };
        // Reverts for nonexistent tokens; report "nobody approved".
        let Ok(data) = self.rpc.call(contract, call.abi_encode().into()).await else {
            return Ok(None);
        };
        let approved = erc721::getApprovedCall::abi_decode_returns(&data)?;
        Ok((approved != Address::ZERO).then_some(approved))
    }
}
