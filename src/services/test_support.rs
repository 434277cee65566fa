//! In-process stand-ins for the chain and model collaborators.

use crate::blockchain::{ChainClient, NetworkStatus, OnChainIdentity, OnChainVerification, TxReceipt};
use crate::errors::{AppError, Result};
use crate::models::face_verification::FaceBox;
use crate::services::face_model::FaceModel;
use crate::utils::imaging::encode_png_base64;
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReceiptMode {
    Success,
    Reverted,
    Never,
}

pub struct FakeChain {
    pub fail_send: AtomicBool,
    pub receipt_mode: Mutex<ReceiptMode>,
    pub calls: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            fail_send: AtomicBool::new(false),
            receipt_mode: Mutex::new(ReceiptMode::Success),
            calls: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }
}

impl FakeChain {
    pub fn failing() -> Self {
        let chain = Self::default();
        chain.fail_send.store(true, Ordering::SeqCst);
        chain
    }

    pub fn with_receipts(mode: ReceiptMode) -> Self {
        let chain = Self::default();
        *chain.receipt_mode.lock().unwrap() = mode;
        chain
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn send(&self, call: String) -> Result<String> {
        self.calls.lock().unwrap().push(call);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(AppError::BlockchainError("connection refused".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0x{:064x}", n + 1))
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn store_verification(&self, user_id: &str, kyc_id: &str, hash: &str, status: bool, admin_id: &str) -> Result<String> {
        self.send(format!("store:{}:{}:{}:{}:{}", user_id, kyc_id, hash, status, admin_id))
    }

    async fn get_verification(&self, _user_id: &str, _kyc_id: &str) -> Result<OnChainVerification> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(AppError::BlockchainError("error sending request for url (http://10.0.0.5:8545/)".to_string()));
        }
        Ok(OnChainVerification {
            exists: true,
            status: true,
            timestamp: 1_700_000_000,
            admin_id: "admin".to_string(),
            verification_hash: "hash".to_string(),
        })
    }

    async fn update_identity(&self, user_id: &str, identity_hash: &str, admin_id: &str) -> Result<String> {
        self.send(format!("identity:{}:{}:{}", user_id, identity_hash, admin_id))
    }

    async fn get_identity(&self, _user_id: &str) -> Result<OnChainIdentity> {
        Ok(OnChainIdentity {
            exists: false,
            identity_hash: String::new(),
            timestamp: 0,
            admin_id: String::new(),
        })
    }

    async fn revoke_verification(&self, user_id: &str, kyc_id: &str, reason: &str, admin_id: &str) -> Result<String> {
        self.send(format!("revoke:{}:{}:{}:{}", user_id, kyc_id, reason, admin_id))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let mode = *self.receipt_mode.lock().unwrap();
        if mode == ReceiptMode::Never {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            transaction_hash: tx_hash.to_string(),
            block_number: 7,
            gas_used: 150_000,
            effective_gas_price: Some(2_000_000_000),
            success: mode == ReceiptMode::Success,
        }))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(10)
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(2_000_000_000)
    }

    async fn network_status(&self) -> NetworkStatus {
        NetworkStatus {
            connected: !self.fail_send.load(Ordering::SeqCst),
            chain_id: Some(1337),
            latest_block: Some(10),
            node_url: "fake://chain".to_string(),
            ..Default::default()
        }
    }
}

/// Reports one centred face, a quarter of each side, per image, except for images whose width is
/// `faceless_width`. `score` of `None` makes `compare` fail.
pub struct FakeFaceModel {
    pub score: Mutex<Option<f64>>,
    pub faceless_width: Mutex<Option<u32>>,
    pub compare_calls: AtomicU64,
}

impl FakeFaceModel {
    pub fn scoring(score: f64) -> Self {
        Self {
            score: Mutex::new(Some(score)),
            faceless_width: Mutex::new(None),
            compare_calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl FaceModel for FakeFaceModel {
    async fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let (width, height) = image.dimensions();
        if *self.faceless_width.lock().unwrap() == Some(width) {
            return Ok(vec![]);
        }
        Ok(vec![FaceBox {
            x: width * 3 / 8,
            y: height * 3 / 8,
            width: width / 4,
            height: height / 4,
        }])
    }

    async fn compare(&self, _a: &DynamicImage, _b: &DynamicImage) -> Result<f64> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        (*self.score.lock().unwrap()).ok_or_else(|| AppError::FaceModelError("model crashed".to_string()))
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic high-frequency noise: sharp, and large enough as PNG to
/// pass the image size checks.
pub fn noise_image(width: u32, height: u32) -> DynamicImage {
    let mut state: u32 = width.wrapping_mul(31).wrapping_add(height);
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let v = (state >> 24) as u8;
        Rgb([v, v.wrapping_add(60), v.wrapping_add(120)])
    }))
}

pub fn noise_png_base64(width: u32, height: u32) -> String {
    encode_png_base64(&noise_image(width, height)).unwrap()
}
