mod utils;

use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

use ni_porep_pipeline::artifacts::{Artifact, ArtifactStore};
use ni_porep_pipeline::error::PipelineError;
use ni_porep_pipeline::parameters::{BuiltinParameters, ParameterPaths, ParameterResolver};
use ni_porep_pipeline::pipeline::{
    Field, JournalStatus, Outcome, PipelineDriver, RunJournal, StageSequence, VerificationPolicy,
};
use ni_porep_pipeline::stage::StageId;
use utils::{comm_r_of, fake_stages, test_config, Corrupting, Recording, TEST_SECTOR_SIZE};

fn builtin() -> BuiltinParameters {
    BuiltinParameters::new(ParameterPaths::new("/var/tmp/filecoin-proof-parameters"))
}

fn all_stages() -> Vec<StageId> {
    vec![
        StageId::TreeD,
        StageId::Sdr,
        StageId::TreeC,
        StageId::TreeRLast,
        StageId::CommR,
        StageId::ChallengesNi,
        StageId::MerkleProofs,
        StageId::SnarkProof,
        StageId::SnarkProofVerify,
        StageId::SnarkProofAggregate,
        StageId::SnarkProofVerifyAggregated,
    ]
}

#[test]
fn end_to_end_run_produces_every_artifact_and_verifies() {
    let dir = tempdir().unwrap();
    let output_dir = dir.path().join("sector-1");
    let config = test_config(&output_dir);

    let invoker = Recording::new(fake_stages());
    let driver = PipelineDriver::new(&invoker, StageSequence::ni_porep()).unwrap();
    let report = driver.run(&config, &builtin()).unwrap();

    assert_eq!(invoker.calls(), all_stages());
    assert_eq!(report.completed, all_stages());

    let params = &report.parameters;
    let store = ArtifactStore::new(&output_dir, params.num_layers);

    let staged = fs::metadata(store.path_for(Artifact::StagedData)).unwrap();
    assert_eq!(staged.len(), TEST_SECTOR_SIZE);

    for layer in store.layer_paths() {
        assert_eq!(fs::metadata(&layer).unwrap().len(), TEST_SECTOR_SIZE);
    }
    assert!(!store.layer_path(params.num_layers + 1).exists());

    let challenges: Value =
        serde_json::from_slice(&fs::read(store.path_for(Artifact::Challenges)).unwrap()).unwrap();
    let challenges = challenges["challenges"].as_array().unwrap();
    assert_eq!(
        challenges.len(),
        params.num_partitions * params.num_challenges_per_partition
    );
    assert_eq!(report.challenges().unwrap().len(), challenges.len());

    for artifact in [
        Artifact::TreeD,
        Artifact::TreeC,
        Artifact::TreeRLast,
        Artifact::VanillaProofs,
        Artifact::SnarkProof,
        Artifact::AggregatedProof,
    ] {
        assert!(store.path_for(artifact).is_file(), "{artifact} is missing");
    }

    assert_eq!(report.verdicts.len(), 2);
    assert!(report.verdicts.iter().all(|v| v.verified));
    assert_eq!(report.verdicts[0].field, Field::SnarkVerdict);
    assert_eq!(report.verdicts[1].field, Field::AggregateVerdict);
    assert_eq!(report.outcome, Outcome::Verified);
    assert!(report.ensure_verified().is_ok());

    assert_eq!(
        report.artifacts.get("sector_key"),
        Some(&store.sector_key_path())
    );
    assert_eq!(
        report.artifacts.get("snark_proof_aggregated"),
        Some(&store.path_for(Artifact::AggregatedProof))
    );
}

#[test]
fn comm_r_binds_comm_c_and_comm_r_last() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let driver = PipelineDriver::new(fake_stages(), StageSequence::ni_porep()).unwrap();
    let report = driver.run(&config, &builtin()).unwrap();

    let comm_c = report.commitment(Field::CommC).unwrap();
    let comm_r_last = report.commitment(Field::CommRLast).unwrap();
    let comm_r = report.commitment(Field::CommR).unwrap();
    assert_eq!(
        comm_r.to_hex(),
        comm_r_of(&comm_c.to_hex(), &comm_r_last.to_hex())
    );
}

#[test]
fn identical_inputs_give_identical_commitments_and_challenges() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let driver = PipelineDriver::new(fake_stages(), StageSequence::ni_porep()).unwrap();

    let a = driver.run(&test_config(first.path()), &builtin()).unwrap();
    let b = driver.run(&test_config(second.path()), &builtin()).unwrap();

    assert_eq!(a.parameters, b.parameters);
    assert_eq!(a.commitment(Field::CommR), b.commitment(Field::CommR));
    assert_eq!(a.challenges(), b.challenges());
    assert_eq!(a.outputs, b.outputs);
}

#[test]
fn rerunning_into_the_same_directory_overwrites_artifacts() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let driver = PipelineDriver::new(fake_stages(), StageSequence::ni_porep()).unwrap();

    let first = driver.run(&config, &builtin()).unwrap();
    let second = driver.run(&config, &builtin()).unwrap();

    assert_eq!(first.outputs, second.outputs);
    assert_eq!(
        fs::metadata(dir.path().join("unsealed.dat")).unwrap().len(),
        TEST_SECTOR_SIZE
    );
}

#[test]
fn corrupted_commitments_fail_verification() {
    for key in ["comm_c", "comm_d", "comm_r", "comm_r_last"] {
        let dir = tempdir().unwrap();
        let invoker = Corrupting::new(fake_stages(), StageId::SnarkProof, key);
        let driver = PipelineDriver::new(invoker, StageSequence::ni_porep()).unwrap();

        let report = driver.run(&test_config(dir.path()), &builtin()).unwrap();

        assert_eq!(
            report.outcome,
            Outcome::VerificationFailed {
                stage: StageId::SnarkProofVerify
            },
            "corrupting {key} went unnoticed"
        );
        assert!(!report.is_verified());
        assert_eq!(report.completed.last(), Some(&StageId::SnarkProofVerify));
        assert!(matches!(
            report.ensure_verified(),
            Err(PipelineError::VerificationFailed {
                stage: StageId::SnarkProofVerify
            })
        ));
    }
}

#[test]
fn proceed_policy_aggregates_after_a_failed_verification() {
    let dir = tempdir().unwrap();
    let invoker = Recording::new(Corrupting::new(fake_stages(), StageId::SnarkProof, "comm_d"));
    let driver = PipelineDriver::new(&invoker, StageSequence::ni_porep())
        .unwrap()
        .with_policy(VerificationPolicy::Proceed);

    let report = driver.run(&test_config(dir.path()), &builtin()).unwrap();

    assert_eq!(invoker.calls(), all_stages());
    assert!(dir.path().join("snark-proof-aggregated.dat").is_file());
    let verdicts: Vec<bool> = report.verdicts.iter().map(|v| v.verified).collect();
    assert_eq!(verdicts, vec![false, false]);
    assert_eq!(
        report.outcome,
        Outcome::VerificationFailed {
            stage: StageId::SnarkProofVerify
        }
    );
}

#[test]
fn abort_policy_skips_aggregation() {
    let dir = tempdir().unwrap();
    let invoker = Recording::new(Corrupting::new(fake_stages(), StageId::SnarkProof, "comm_r"));
    let driver = PipelineDriver::new(&invoker, StageSequence::ni_porep()).unwrap();
    assert_eq!(driver.policy(), VerificationPolicy::Abort);

    driver.run(&test_config(dir.path()), &builtin()).unwrap();

    let calls = invoker.calls();
    assert_eq!(calls.last(), Some(&StageId::SnarkProofVerify));
    assert!(!calls.contains(&StageId::SnarkProofAggregate));
    assert!(!dir.path().join("snark-proof-aggregated.dat").exists());
}

#[test]
fn journal_records_completed_stages_and_outputs() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let driver = PipelineDriver::new(fake_stages(), StageSequence::ni_porep()).unwrap();
    let report = driver.run(&config, &builtin()).unwrap();

    let params = builtin().resolve(config.sector_size).unwrap();
    let journal = RunJournal::load(&ArtifactStore::new(dir.path(), params.num_layers)).unwrap();

    assert_eq!(journal.status, JournalStatus::Completed);
    assert_eq!(journal.completed, all_stages());
    assert_eq!(journal.outputs, report.outputs);
    assert_eq!(journal.parameters, params);
    assert_eq!(journal.seed, config.seed);
    assert!(journal.updated_at >= journal.started_at);
}
