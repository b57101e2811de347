//! Fake stages that honour the file and record contract of the real ones,
//! with SHA-256 standing in for the proof system.

#![allow(dead_code)]

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use ni_porep_pipeline::run_config::{RunConfig, RunInputs};
use ni_porep_pipeline::stage::{InProcessInvoker, StageError, StageId, StageInvoker, StageRecord};
use ni_porep_pipeline::types::Bytes32;

pub const TEST_SECTOR_SIZE: u64 = 16384;
pub const NODE_SIZE: u64 = 32;

pub fn test_inputs(output_dir: &Path) -> RunInputs {
    RunInputs {
        output_dir: Some(output_dir.to_path_buf()),
        porep_id: Some(Bytes32([5; 32]).to_hex()),
        replica_id: Some(Bytes32([0xab; 32]).to_hex()),
        sector_size: Some(TEST_SECTOR_SIZE),
        seed: Some(Bytes32([0x42; 32]).to_hex()),
    }
}

pub fn test_config(output_dir: &Path) -> RunConfig {
    RunConfig::try_from(test_inputs(output_dir)).expect("test inputs are valid")
}

pub fn empty() -> StageRecord {
    StageRecord::new()
}

pub fn record(value: Value) -> StageRecord {
    match value {
        Value::Object(map) => map,
        other => panic!("not a record: {other}"),
    }
}

fn hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn commitment(parts: &[&[u8]]) -> String {
    Bytes32(hash(parts)).to_hex()
}

fn text<'a>(request: &'a StageRecord, key: &str) -> Result<&'a str, String> {
    request
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string field `{key}`"))
}

fn number(request: &StageRecord, key: &str) -> Result<u64, String> {
    request
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("missing numeric field `{key}`"))
}

fn read(path: &str) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("cannot read {path}: {e}"))
}

fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), String> {
    let path = path.as_ref();
    fs::write(path, contents).map_err(|e| format!("cannot write {}: {e}", path.display()))
}

fn read_record(path: &str) -> Result<Value, String> {
    serde_json::from_slice(&read(path)?).map_err(|e| format!("{path} is not JSON: {e}"))
}

fn layer_path(dir: &str, layer: u64) -> PathBuf {
    Path::new(dir).join(format!("sc-02-data-layer-{layer}.dat"))
}

pub fn comm_r_of(comm_c: &str, comm_r_last: &str) -> String {
    commitment(&[comm_c.as_bytes(), comm_r_last.as_bytes()])
}

fn tree_d(request: &StageRecord) -> Result<StageRecord, String> {
    let data = read(text(request, "input_path")?)?;
    if data.len() as u64 != number(request, "sector_size")? {
        return Err("staged data does not match the sector size".into());
    }
    let comm_d = commitment(&[b"tree-d".as_slice(), data.as_slice()]);
    write(
        Path::new(text(request, "output_dir")?).join("sc-02-data-tree-d.dat"),
        &comm_d,
    )?;
    Ok(record(json!({ "comm_d": comm_d })))
}

fn sdr(request: &StageRecord) -> Result<StageRecord, String> {
    let dir = text(request, "output_dir")?;
    let size = number(request, "sector_size")? as usize;
    let porep_id = text(request, "porep_id")?;
    let replica_id = text(request, "replica_id")?;
    for layer in 1..=number(request, "num_layers")? {
        let label = hash(&[
            porep_id.as_bytes(),
            replica_id.as_bytes(),
            layer.to_le_bytes().as_slice(),
        ]);
        let contents: Vec<u8> = label.iter().copied().cycle().take(size).collect();
        write(layer_path(dir, layer), contents)?;
    }
    Ok(empty())
}

fn tree_c(request: &StageRecord) -> Result<StageRecord, String> {
    let dir = text(request, "input_dir")?;
    let mut hasher = Sha256::new();
    hasher.update(b"tree-c");
    for layer in 1..=number(request, "num_layers")? {
        hasher.update(read(&layer_path(dir, layer).to_string_lossy())?);
    }
    let comm_c = Bytes32(hasher.finalize().into()).to_hex();
    write(Path::new(dir).join("sc-02-data-tree-c.dat"), &comm_c)?;
    Ok(record(json!({ "comm_c": comm_c })))
}

fn tree_r_last(request: &StageRecord) -> Result<StageRecord, String> {
    let replica = read(text(request, "replica_path")?)?;
    let comm_r_last = commitment(&[b"tree-r-last".as_slice(), replica.as_slice()]);
    write(
        Path::new(text(request, "output_dir")?).join("sc-02-data-tree-r-last.dat"),
        &comm_r_last,
    )?;
    Ok(record(json!({ "comm_r_last": comm_r_last })))
}

fn comm_r(request: &StageRecord) -> Result<StageRecord, String> {
    let comm_r = comm_r_of(text(request, "comm_c")?, text(request, "comm_r_last")?);
    Ok(record(json!({ "comm_r": comm_r })))
}

fn challenges(request: &StageRecord) -> Result<StageRecord, String> {
    let count = number(request, "num_partitions")? * number(request, "num_challenges_per_partition")?;
    let nodes = number(request, "sector_size")? / NODE_SIZE;
    let replica_id = text(request, "replica_id")?;
    let comm_r = text(request, "comm_r")?;
    let challenges: Vec<u64> = (0..count)
        .map(|i| {
            let digest = hash(&[replica_id.as_bytes(), comm_r.as_bytes(), i.to_le_bytes().as_slice()]);
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest[..8]);
            u64::from_le_bytes(word) % nodes
        })
        .collect();
    Ok(record(json!({ "challenges": challenges })))
}

fn merkle_proofs(request: &StageRecord) -> Result<StageRecord, String> {
    let challenges = request
        .get("challenges")
        .and_then(Value::as_array)
        .ok_or("missing challenges")?;
    for tree in ["sc-02-data-tree-d.dat", "sc-02-data-tree-c.dat", "sc-02-data-tree-r-last.dat"] {
        read(&Path::new(text(request, "input_dir")?).join(tree).to_string_lossy())?;
    }
    let replica = read(text(request, "replica_path")?)?;
    let proofs = json!({
        "comm_c": text(request, "comm_c")?,
        "comm_d": text(request, "comm_d")?,
        "replica": commitment(&[replica.as_slice()]),
        "num_challenges": challenges.len(),
        "seed": text(request, "seed")?,
    });
    write(text(request, "output_path")?, proofs.to_string())?;
    Ok(empty())
}

fn snark_proof(request: &StageRecord) -> Result<StageRecord, String> {
    let vanilla = read_record(text(request, "porep_proofs_path")?)?;
    let comm_c = text(request, "comm_c")?;
    let comm_d = text(request, "comm_d")?;
    let comm_r = text(request, "comm_r")?;
    let comm_r_last = text(request, "comm_r_last")?;
    let consistent = comm_r_of(comm_c, comm_r_last) == comm_r
        && vanilla["comm_c"] == comm_c
        && vanilla["comm_d"] == comm_d;
    let expected = number(request, "num_partitions")? * number(request, "num_challenges_per_partition")?;
    let proof = json!({
        "comm_d": comm_d,
        "comm_r": comm_r,
        "consistent": consistent && vanilla["num_challenges"] == expected,
        "partitions": number(request, "num_partitions")?,
    });
    write(text(request, "output_path")?, proof.to_string())?;
    Ok(empty())
}

fn proof_holds(proof: &Value, request: &StageRecord) -> Result<bool, String> {
    Ok(proof["consistent"] == true
        && proof["comm_d"] == text(request, "comm_d")?
        && proof["comm_r"] == text(request, "comm_r")?
        && proof["partitions"] == number(request, "num_partitions")?)
}

fn snark_proof_verify(request: &StageRecord) -> Result<StageRecord, String> {
    let proof = read_record(text(request, "input_path")?)?;
    let verifies = proof_holds(&proof, request)?;
    Ok(record(json!({ "verifies": verifies })))
}

fn snark_proof_aggregate(request: &StageRecord) -> Result<StageRecord, String> {
    let proof = read_record(text(request, "input_path")?)?;
    let aggregated = json!({
        "inner": proof,
        "comm_r": text(request, "comm_r")?,
        "num_proofs": number(request, "num_proofs")?,
        "seed": text(request, "seed")?,
    });
    write(text(request, "output_path")?, aggregated.to_string())?;
    Ok(empty())
}

fn snark_proof_verify_aggregated(request: &StageRecord) -> Result<StageRecord, String> {
    let aggregated = read_record(text(request, "input_path")?)?;
    let verifies = proof_holds(&aggregated["inner"], request)?
        && aggregated["comm_r"] == text(request, "comm_r")?
        && aggregated["num_proofs"] == number(request, "num_partitions")?
        && aggregated["seed"] == text(request, "seed")?;
    Ok(record(json!({ "verifies": verifies })))
}

/// Every pipeline stage backed by a fake implementation.
pub fn fake_stages() -> InProcessInvoker {
    InProcessInvoker::new()
        .register(StageId::TreeD, tree_d)
        .register(StageId::Sdr, sdr)
        .register(StageId::TreeC, tree_c)
        .register(StageId::TreeRLast, tree_r_last)
        .register(StageId::CommR, comm_r)
        .register(StageId::ChallengesNi, challenges)
        .register(StageId::MerkleProofs, merkle_proofs)
        .register(StageId::SnarkProof, snark_proof)
        .register(StageId::SnarkProofVerify, snark_proof_verify)
        .register(StageId::SnarkProofAggregate, snark_proof_aggregate)
        .register(StageId::SnarkProofVerifyAggregated, snark_proof_verify_aggregated)
}

/// Records which stages were invoked, in order.
pub struct Recording<I> {
    inner: I,
    calls: RefCell<Vec<StageId>>,
}

impl<I> Recording<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<StageId> {
        self.calls.borrow().clone()
    }
}

impl<I: StageInvoker> StageInvoker for Recording<I> {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError> {
        self.calls.borrow_mut().push(stage);
        self.inner.invoke(stage, request)
    }
}

/// Replaces one commitment in the request of one stage with garbage.
pub struct Corrupting<I> {
    inner: I,
    stage: StageId,
    key: &'static str,
}

impl<I> Corrupting<I> {
    pub fn new(inner: I, stage: StageId, key: &'static str) -> Self {
        Self { inner, stage, key }
    }
}

impl<I: StageInvoker> StageInvoker for Corrupting<I> {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError> {
        if stage != self.stage {
            return self.inner.invoke(stage, request);
        }
        let mut tampered = request.clone();
        let original = tampered
            .get(self.key)
            .cloned()
            .unwrap_or_else(|| panic!("{stage} request has no `{}`", self.key));
        assert!(original.is_string(), "`{}` is not a commitment", self.key);
        tampered.insert(self.key.to_string(), json!(Bytes32([0xee; 32]).to_hex()));
        self.inner.invoke(stage, &tampered)
    }
}
