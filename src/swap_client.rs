//! HTTP swap program client
//!
//! Quotes come from `GET {base}/quote`; swap instructions from
//! `POST {base}/swap-instructions`, returned as
//! `{ "instructions": [{ "program_id", "data" (base64), "accounts" }] }`.
//! The minimum output is sent with the request and must be encoded by the
//! service into the swap instruction.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use serde::Deserialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};
use tracing::{debug, warn};

use crate::errors::{DappError, DappResult};
use crate::swap::{ProgramQuote, SwapProgramClient};

const MAX_INSTRUCTION_DATA: usize = 4096;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    out_amount: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstructionsResponse {
    instructions: Vec<RawInstruction>,
}

#[derive(Debug, Deserialize)]
struct RawInstruction {
    program_id: String,
    data: String,
    #[serde(default)]
    accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    pubkey: String,
    #[serde(default)]
    is_signer: bool,
    #[serde(default)]
    is_writable: bool,
}

pub struct HttpSwapProgramClient {
    http: reqwest::Client,
    base_url: String,
    /// Swap program every non-token instruction must target, if set
    program_id: Option<Pubkey>,
}

impl HttpSwapProgramClient {
    pub fn new(base_url: impl Into<String>, program_id: Option<Pubkey>, timeout: Duration) -> DappResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DappError::Configuration(format!("swap http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            program_id,
        })
    }

    fn is_program_allowed(&self, program: &Pubkey) -> bool {
        match self.program_id {
            None => true,
            Some(swap) => {
                *program == swap
                    || *program == system_program::id()
                    || *program == spl_token::id()
                    || *program == spl_associated_token_account::id()
            }
        }
    }

    fn parse_instruction(&self, raw: RawInstruction) -> DappResult<Instruction> {
        let build_err = |reason: String| DappError::InstructionBuild {
            program: "swap-api".to_string(),
            reason,
        };

        let program_id =
            Pubkey::from_str(&raw.program_id).map_err(|e| build_err(format!("invalid program_id: {}", e)))?;
        if !self.is_program_allowed(&program_id) {
            return Err(build_err(format!("program {} not allowed", program_id)));
        }

        let data = BASE64_STANDARD
            .decode(&raw.data)
            .map_err(|e| build_err(format!("base64 decode error: {}", e)))?;
        if data.len() > MAX_INSTRUCTION_DATA {
            return Err(build_err("instruction data too large (max 4KB)".to_string()));
        }

        let accounts = raw
            .accounts
            .into_iter()
            .map(|a| {
                let key = Pubkey::from_str(&a.pubkey).map_err(|e| build_err(format!("invalid account: {}", e)))?;
                Ok(if a.is_writable {
                    AccountMeta::new(key, a.is_signer)
                } else {
                    AccountMeta::new_readonly(key, a.is_signer)
                })
            })
            .collect::<DappResult<Vec<_>>>()?;

        Ok(Instruction::new_with_bytes(program_id, &data, accounts))
    }
}

#[async_trait]
impl SwapProgramClient for HttpSwapProgramClient {
    async fn get_quote(&self, mint_in: &Pubkey, mint_out: &Pubkey, amount_in: u64) -> DappResult<ProgramQuote> {
        let url = format!("{}/quote", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", mint_in.to_string()),
                ("outputMint", mint_out.to_string()),
                ("amount", amount_in.to_string()),
            ])
            .send()
            .await
            .map_err(|e| DappError::Quote(format!("quote request: {}", e)))?;

        if !resp.status().is_success() {
            return Err(DappError::Quote(format!("quote service returned {}", resp.status())));
        }
        let body: QuoteResponse = resp
            .json()
            .await
            .map_err(|e| DappError::Quote(format!("JSON parse error: {}", e)))?;

        let output_amount = body
            .out_amount
            .parse::<u64>()
            .map_err(|e| DappError::Quote(format!("outAmount '{}': {}", body.out_amount, e)))?;
        let price_impact = match body.price_impact_pct.as_deref() {
            Some(p) => p
                .parse::<f64>()
                .map_err(|e| DappError::Quote(format!("priceImpactPct '{}': {}", p, e)))?,
            None => 0.0,
        };
        debug!(amount_in, output_amount, price_impact, "Quote received");
        Ok(ProgramQuote {
            output_amount,
            price_impact,
        })
    }

    async fn create_swap_instructions(
        &self,
        mint_in: &Pubkey,
        mint_out: &Pubkey,
        amount_in: u64,
        minimum_out: u64,
        payer: &Pubkey,
    ) -> DappResult<Vec<Instruction>> {
        let payload = serde_json::json!({
            "inputMint": mint_in.to_string(),
            "outputMint": mint_out.to_string(),
            "amount": amount_in,
            "minimumOut": minimum_out,
            "payer": payer.to_string(),
        });
        let url = format!("{}/swap-instructions", self.base_url);

        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DappError::Rpc(format!("swap instructions request: {}", e)))?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Swap instructions request rejected");
            return Err(DappError::InstructionBuild {
                program: "swap-api".to_string(),
                reason: format!("service returned {}", resp.status()),
            });
        }
        let body: InstructionsResponse = resp.json().await.map_err(|e| DappError::InstructionBuild {
            program: "swap-api".to_string(),
            reason: format!("JSON parse error: {}", e),
        })?;
        if body.instructions.is_empty() {
            return Err(DappError::InstructionBuild {
                program: "swap-api".to_string(),
                reason: "no instructions returned".to_string(),
            });
        }

        body.instructions
            .into_iter()
            .map(|raw| self.parse_instruction(raw))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(url: &str, program: Option<Pubkey>) -> HttpSwapProgramClient {
        HttpSwapProgramClient::new(url, program, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_quote_parses_string_amounts() {
        let mut server = mockito::Server::new_async().await;
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("inputMint".into(), a.to_string()),
                Matcher::UrlEncoded("amount".into(), "1000".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"outAmount":"99000000","priceImpactPct":"0.0012"}"#)
            .create_async()
            .await;

        let quote = client(&server.url(), None).get_quote(&a, &b, 1_000).await.unwrap();
        assert_eq!(quote.output_amount, 99_000_000);
        assert!((quote.price_impact - 0.0012).abs() < 1e-12);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_quote_failure_is_quote_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/quote").match_query(Matcher::Any).with_status(500).create_async().await;

        let err = client(&server.url(), None)
            .get_quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DappError::Quote(_)));
    }

    #[tokio::test]
    async fn test_instructions_decoded_and_filtered() {
        let mut server = mockito::Server::new_async().await;
        let swap_program = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let body = serde_json::json!({
            "instructions": [{
                "program_id": swap_program.to_string(),
                "data": BASE64_STANDARD.encode([1u8, 2, 3]),
                "accounts": [{"pubkey": payer.to_string(), "is_signer": true, "is_writable": true}],
            }]
        });
        server
            .mock("POST", "/swap-instructions")
            .match_body(Matcher::PartialJson(serde_json::json!({"minimumOut": 99_000_000u64})))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let ixs = client(&server.url(), Some(swap_program))
            .create_swap_instructions(&a, &b, 1, 99_000_000, &payer)
            .await
            .unwrap();
        assert_eq!(ixs.len(), 1);
        assert_eq!(ixs[0].data, vec![1, 2, 3]);
        assert!(ixs[0].accounts[0].is_signer);

        let err = client(&server.url(), Some(Pubkey::new_unique()))
            .create_swap_instructions(&a, &b, 1, 99_000_000, &payer)
            .await
            .unwrap_err();
        assert!(matches!(err, DappError::InstructionBuild { .. }));
    }
}
