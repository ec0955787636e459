//! End-to-end scenarios driving the engine through its public operations.

mod common;

use agora_governance::{
    Ballot, ComplianceOutcome, DelegationTable, EscrowPurpose, EscrowState, GovernanceError,
    ProposalStatus, ProposalSubmission, RejectionReason, SettlementPolicy, VoteChoice,
    PARAMETER_CHANGE_KIND,
};
use agora_store::StoreError;
use agora_types::ProposalId;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Reference scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sixty_forty_at_half_threshold_is_approved_and_executed() {
    let h = Harness::new();
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    h.vote(&id, "bob", VoteChoice::No, 40).await;
    assert_eq!(h.balance("alice"), amount(940));
    h.pass_deadline();

    let result = h.engine.close_voting(&id).await.unwrap();
    assert!(result.quorum_met);
    assert!(result.approved);
    assert_eq!(result.tallies.yes, amount(60));
    assert_eq!(result.tallies.no, amount(40));
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::Approved);

    for voter in ["alice", "bob"] {
        let e = h.engine.get_escrow(&id, &who(voter), EscrowPurpose::VoteStake).unwrap();
        assert_eq!(e.state, EscrowState::Released);
        assert_eq!(h.balance(voter), amount(INITIAL_BALANCE));
    }
    let fee = h.engine.get_escrow(&id, &who("proposer"), EscrowPurpose::ProposerFee).unwrap();
    assert_eq!(fee.state, EscrowState::Locked);
    assert_eq!(h.balance("proposer"), amount(900));

    let outcome = h.engine.execute(&id, json!({"amount": 500})).await.unwrap();
    assert_eq!(outcome.executor, SCRIPTED_KIND);
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::Executed);
    assert_eq!(p.execution_attempts, 1);
    assert_eq!(h.balance("proposer"), amount(INITIAL_BALANCE));
    assert_eq!(h.executor.invocations()[0].params, json!({"amount": 500}));
}

#[tokio::test]
async fn sixty_forty_at_seventy_percent_is_rejected_and_fee_forfeited() {
    let h = Harness::new();
    h.engine.set_delegation_threshold(&who("root"), 7_000).unwrap();
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    h.vote(&id, "bob", VoteChoice::No, 40).await;
    h.pass_deadline();

    let result = h.engine.close_voting(&id).await.unwrap();
    assert!(!result.approved);
    assert_eq!(result.threshold.bps, 7_000);
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::Rejected);
    assert_eq!(p.rejection, Some(RejectionReason::Vote));

    let fee = h.engine.get_escrow(&id, &who("proposer"), EscrowPurpose::ProposerFee).unwrap();
    assert_eq!(fee.state, EscrowState::Forfeited);
    assert_eq!(h.balance("proposer"), amount(900));
    assert_eq!(h.balance("alice"), amount(INITIAL_BALANCE));
    assert_eq!(h.balance("bob"), amount(INITIAL_BALANCE));
}

#[tokio::test]
async fn vote_after_deadline_changes_nothing() {
    let h = Harness::new();
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    h.pass_deadline();

    let err = h
        .engine
        .cast_vote(&id, Ballot::new(who("carol"), VoteChoice::No, amount(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::DeadlinePassed { .. }));

    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.tallies.no, amount(0));
    assert_eq!(p.tallies.voters, 1);
    assert!(matches!(
        h.engine.get_escrow(&id, &who("carol"), EscrowPurpose::VoteStake),
        Err(GovernanceError::NotFound(_))
    ));
    assert_eq!(h.balance("carol"), amount(INITIAL_BALANCE));
}

#[tokio::test]
async fn revert_of_executed_proposal_is_refused() {
    let h = Harness::new();
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 150).await;
    h.pass_deadline();
    h.engine.close_voting(&id).await.unwrap();
    h.engine.execute(&id, json!(null)).await.unwrap();
    let before = h.engine.get_proposal(&id).unwrap();

    let err = h.engine.revert(&id, &who("root"), "too late").await.unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InvalidStateTransition {
            from: ProposalStatus::Executed,
            to: ProposalStatus::Reverted
        }
    ));
    assert_eq!(h.engine.get_proposal(&id).unwrap(), before);
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_locks_fee_and_waits_for_review() {
    let h = Harness::new();
    let id = h.submit(25).await;
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::ComplianceReview);
    assert_eq!(p.voting_deadline, None);
    assert_eq!(h.balance("proposer"), amount(975));
}

#[tokio::test]
async fn duplicate_external_id_is_rejected_without_debit() {
    let h = Harness::new();
    let id = ProposalId::new([42; 32]);
    let submission = ProposalSubmission::new(who("proposer"), details(SCRIPTED_KIND), amount(10)).with_id(id);
    h.engine.submit_proposal(submission.clone()).await.unwrap();

    let err = h.engine.submit_proposal(submission).await.unwrap_err();
    assert!(matches!(err, GovernanceError::DuplicateProposal(dup) if dup == id));
    assert_eq!(h.balance("proposer"), amount(990));
}

#[tokio::test]
async fn derived_ids_differ_for_identical_submissions() {
    let h = Harness::new();
    let a = h.submit(10).await;
    let b = h.submit(10).await;
    assert_ne!(a, b);
    assert_eq!(h.engine.list_proposals(None).unwrap().len(), 2);
}

#[tokio::test]
async fn submission_without_funds_creates_nothing() {
    let h = Harness::new();
    let err = h
        .engine
        .submit_proposal(ProposalSubmission::new(who("proposer"), details(SCRIPTED_KIND), amount(5_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InsufficientBalance { .. }));
    assert!(h.engine.list_proposals(None).unwrap().is_empty());
    assert!(h.ledger.is_empty());
}

#[tokio::test]
async fn failed_proposal_write_refunds_fee() {
    let h = Harness::new();
    // Let the fee escrow row commit, then fail the proposal record.
    h.ledger.fail_commit_after(1, StoreError::Backend("disk full".into()));
    let err = h
        .engine
        .submit_proposal(ProposalSubmission::new(who("proposer"), details(SCRIPTED_KIND), amount(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Store(StoreError::Backend(_))));
    assert_eq!(h.balance("proposer"), amount(INITIAL_BALANCE));
    assert!(h.ledger.is_empty());
}

#[tokio::test]
async fn malformed_proposer_is_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .submit_proposal(ProposalSubmission::new(who("has space"), details(SCRIPTED_KIND), amount(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidRequest(_)));
}

// ---------------------------------------------------------------------------
// Compliance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn compliance_pass_opens_voting_with_deadline() {
    let h = Harness::new();
    let id = h.submit(10).await;
    let report = h.engine.review_compliance(&id).await.unwrap();
    assert!(report.passed);
    assert_eq!(report.voting_deadline.unwrap().as_secs(), START + VOTING_PERIOD);

    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::Open);
    let history = h.engine.compliance_history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].passed);
}

#[tokio::test]
async fn compliance_rejection_is_terminal_and_forfeits_fee() {
    let h = Harness::new();
    h.policy.push(PolicyStep::Fail("spam"));
    let id = h.submit(40).await;

    let err = h.engine.review_compliance(&id).await.unwrap_err();
    assert!(matches!(&err, GovernanceError::ComplianceRejected(notes) if notes == "spam"));
    assert!(!err.is_retryable());
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::Rejected);
    assert_eq!(p.rejection, Some(RejectionReason::Compliance));
    let fee = h.engine.get_escrow(&id, &who("proposer"), EscrowPurpose::ProposerFee).unwrap();
    assert_eq!(fee.state, EscrowState::Forfeited);

    // Re-running review reports the same verdict without consulting the policy again.
    let again = h.engine.review_compliance(&id).await.unwrap_err();
    assert!(matches!(again, GovernanceError::ComplianceRejected(_)));
    assert_eq!(h.policy.calls(), 1);
    assert_eq!(h.engine.compliance_history(&id).unwrap().len(), 1);
}

#[tokio::test]
async fn compliance_rejection_can_return_fee_by_policy() {
    let mut params = test_params();
    params.settlement = SettlementPolicy {
        forfeit_fee_on_compliance_rejection: false,
        ..SettlementPolicy::default()
    };
    let h = Harness::with_params(params);
    h.policy.push(PolicyStep::Fail("off topic"));
    let id = h.submit(40).await;
    assert!(h.engine.review_compliance(&id).await.is_err());
    assert_eq!(h.balance("proposer"), amount(INITIAL_BALANCE));
}

#[tokio::test]
async fn unavailable_policy_is_retryable_and_retry_replaces_entry() {
    let h = Harness::new();
    h.policy.push(PolicyStep::Unavailable);
    let id = h.submit(10).await;

    let err = h.engine.review_compliance(&id).await.unwrap_err();
    assert!(matches!(err, GovernanceError::ComplianceUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::ComplianceReview);
    let history = h.engine.compliance_history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ComplianceOutcome::Unavailable);

    h.engine.review_compliance(&id).await.unwrap();
    let history = h.engine.compliance_history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ComplianceOutcome::Passed);
    assert_eq!(history[0].attempt, 2);
}

#[tokio::test]
async fn slow_policy_times_out_without_advancing() {
    let h = Harness::new();
    h.policy.push(PolicyStep::Hang(Duration::from_secs(5)));
    let id = h.submit(10).await;

    let err = h
        .engine
        .review_compliance_with_timeout(&id, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ComplianceUnavailable(_)));
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::ComplianceReview);
}

#[tokio::test]
async fn repeated_review_of_open_proposal_returns_same_report() {
    let h = Harness::new();
    let id = h.submit(10).await;
    let first = h.engine.review_compliance(&id).await.unwrap();
    h.clock.advance(60);
    let second = h.engine.review_compliance(&id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.policy.calls(), 1);
}

#[tokio::test]
async fn history_of_unknown_proposal_is_not_found() {
    let h = Harness::new();
    assert!(matches!(
        h.engine.compliance_history(&ProposalId::new([1; 32])),
        Err(GovernanceError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Voting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn votes_before_review_are_refused() {
    let h = Harness::new();
    let id = h.submit(10).await;
    let err = h
        .engine
        .cast_vote(&id, Ballot::new(who("alice"), VoteChoice::Yes, amount(10)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::ProposalNotOpen {
            status: ProposalStatus::ComplianceReview
        }
    ));
}

#[tokio::test]
async fn revote_replaces_previous_vote_and_adjusts_stake() {
    let h = Harness::new();
    let id = h.open(10).await;
    let first = h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    assert!(!first.replaced);

    let second = h.vote(&id, "alice", VoteChoice::No, 30).await;
    assert!(second.replaced);
    assert_eq!(second.vote.revisions, 1);
    assert_eq!(second.tallies.yes, amount(0));
    assert_eq!(second.tallies.no, amount(30));
    assert_eq!(second.tallies.voters, 1);
    assert_eq!(h.balance("alice"), amount(970));

    let escrow = h.engine.get_escrow(&id, &who("alice"), EscrowPurpose::VoteStake).unwrap();
    assert_eq!(escrow.amount, amount(30));
    assert_eq!(h.engine.list_votes(&id).unwrap().len(), 1);
}

#[tokio::test]
async fn identical_retry_is_a_no_op() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    let commits = h.ledger.commit_count();

    let retry = h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    assert!(!retry.replaced);
    assert_eq!(retry.vote.revisions, 0);
    assert_eq!(h.ledger.commit_count(), commits);
    assert_eq!(h.balance("alice"), amount(940));
}

#[tokio::test]
async fn claimed_weight_above_stake_is_refused_without_a_resolver() {
    let h = Harness::new();
    let id = h.open(10).await;
    let err = h
        .engine
        .cast_vote(
            &id,
            Ballot::new(who("alice"), VoteChoice::Yes, amount(10)).with_weight(amount(250)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InvalidWeight { claimed, backed }
            if claimed == amount(250) && backed == amount(10)
    ));
    assert!(!err.is_retryable());
    assert_eq!(h.balance("alice"), amount(INITIAL_BALANCE));
    assert!(h.engine.list_votes(&id).unwrap().is_empty());
    assert_eq!(h.engine.get_proposal(&id).unwrap().tallies.total(), amount(0));

    // A claim the stake covers is counted as claimed.
    let receipt = h
        .engine
        .cast_vote(
            &id,
            Ballot::new(who("bob"), VoteChoice::No, amount(50)).with_weight(amount(20)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.tallies.no, amount(20));
    assert_eq!(h.balance("bob"), amount(950));
}

#[tokio::test]
async fn delegated_weight_comes_from_the_resolver() {
    let table = DelegationTable::with_delegations([(who("alice"), amount(240))]);
    let h = Harness::with_delegation(Arc::new(table));
    let id = h.open(10).await;

    let receipt = h
        .engine
        .cast_vote(&id, Ballot::new(who("alice"), VoteChoice::Yes, amount(10)))
        .await
        .unwrap();
    assert_eq!(receipt.tallies.yes, amount(250));
    assert_eq!(h.balance("alice"), amount(990));

    let err = h
        .engine
        .cast_vote(
            &id,
            Ballot::new(who("bob"), VoteChoice::Yes, amount(10)).with_weight(amount(1_000_000)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InvalidWeight { backed, .. } if backed == amount(10)
    ));
    assert_eq!(h.balance("bob"), amount(INITIAL_BALANCE));

    let receipt = h
        .engine
        .cast_vote(
            &id,
            Ballot::new(who("alice"), VoteChoice::No, amount(10)).with_weight(amount(250)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.tallies.no, amount(250));
    assert_eq!(receipt.tallies.yes, amount(0));
}

#[tokio::test]
async fn vote_without_funds_locks_nothing() {
    let h = Harness::new();
    let id = h.open(10).await;
    let err = h
        .engine
        .cast_vote(&id, Ballot::new(who("alice"), VoteChoice::Yes, amount(5_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InsufficientBalance { .. }));
    assert_eq!(h.engine.get_proposal(&id).unwrap().tallies.voters, 0);
    assert!(h.engine.list_escrows(&id).unwrap().iter().all(|e| e.purpose == EscrowPurpose::ProposerFee));
}

#[tokio::test]
async fn failed_vote_write_undoes_escrow() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 40).await;

    // The re-vote's escrow adjust commits; the vote and tally batch fails.
    h.ledger.fail_commit_after(1, StoreError::Backend("io".into()));
    let err = h
        .engine
        .cast_vote(&id, Ballot::new(who("alice"), VoteChoice::No, amount(90)))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Store(_)));

    assert_eq!(h.balance("alice"), amount(960));
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.tallies.yes, amount(40));
    assert_eq!(p.tallies.no, amount(0));
    let e = h.engine.get_escrow(&id, &who("alice"), EscrowPurpose::VoteStake).unwrap();
    assert_eq!(e.amount, amount(40));
    assert_eq!(h.engine.get_vote(&id, &who("alice")).unwrap().choice, VoteChoice::Yes);
}

#[tokio::test]
async fn abstain_counts_toward_quorum_only() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 20).await;
    h.vote(&id, "bob", VoteChoice::Abstain, 90).await;
    h.pass_deadline();
    let result = h.engine.close_voting(&id).await.unwrap();
    assert!(result.quorum_met);
    assert!(result.approved);
    assert_eq!(result.tallies.abstain, amount(90));
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_before_deadline_without_early_close_is_refused() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 500).await;
    let err = h.engine.close_voting(&id).await.unwrap_err();
    assert!(matches!(err, GovernanceError::VotingInProgress { .. }));
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::Open);
}

#[tokio::test]
async fn early_close_once_quorum_is_reached() {
    let h = Harness::with_params(agora_governance::GovernanceParams {
        early_close_on_quorum: true,
        ..test_params()
    });
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 50).await;
    assert!(matches!(
        h.engine.close_voting(&id).await,
        Err(GovernanceError::VotingInProgress { .. })
    ));
    h.vote(&id, "bob", VoteChoice::Yes, 50).await;
    assert!(h.engine.close_voting(&id).await.unwrap().approved);
}

#[tokio::test]
async fn missing_quorum_rejects() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 99).await;
    h.pass_deadline();
    let result = h.engine.close_voting(&id).await.unwrap();
    assert!(!result.quorum_met);
    assert!(!result.approved);
}

#[tokio::test]
async fn closing_twice_returns_the_stored_result() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 100).await;
    h.pass_deadline();
    let first = h.engine.close_voting(&id).await.unwrap();
    h.engine.set_delegation_threshold(&who("root"), 9_999).unwrap();
    h.clock.advance(100);
    let second = h.engine.close_voting(&id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn threshold_snapshot_records_version_in_effect() {
    let h = Harness::new();
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    h.vote(&id, "bob", VoteChoice::No, 40).await;
    let v2 = h.engine.set_delegation_threshold(&who("root"), 6_000).unwrap();
    h.pass_deadline();
    let result = h.engine.close_voting(&id).await.unwrap();
    assert_eq!(result.threshold, v2);
    assert!(result.approved);

    h.engine.set_delegation_threshold(&who("root"), 9_000).unwrap();
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.threshold_snapshot, Some(v2));
}

#[tokio::test]
async fn losing_voters_forfeit_when_policy_says_so() {
    let h = Harness::with_params(agora_governance::GovernanceParams {
        settlement: SettlementPolicy {
            forfeit_losing_voter_stake: true,
            ..SettlementPolicy::default()
        },
        ..test_params()
    });
    let id = h.open(10).await;
    h.vote(&id, "alice", VoteChoice::Yes, 60).await;
    h.vote(&id, "bob", VoteChoice::No, 40).await;
    h.vote(&id, "carol", VoteChoice::Abstain, 10).await;
    h.pass_deadline();
    assert!(h.engine.close_voting(&id).await.unwrap().approved);

    assert_eq!(h.balance("alice"), amount(INITIAL_BALANCE));
    assert_eq!(h.balance("bob"), amount(960));
    assert_eq!(h.balance("carol"), amount(INITIAL_BALANCE));
}

#[tokio::test]
async fn sweep_closes_only_expired_proposals() {
    let h = Harness::new();
    let early = h.open(10).await;
    h.vote(&early, "alice", VoteChoice::Yes, 100).await;
    h.clock.advance(VOTING_PERIOD / 2);
    let late = h.open(10).await;
    h.clock.advance(VOTING_PERIOD / 2 + 1);

    let closed = h.engine.sweep_expired().await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, early);
    assert_eq!(h.engine.get_proposal(&early).unwrap().status, ProposalStatus::Approved);
    assert_eq!(h.engine.get_proposal(&late).unwrap().status, ProposalStatus::Open);
}

#[tokio::test]
async fn set_threshold_requires_admin_and_valid_range() {
    let h = Harness::new();
    assert!(matches!(
        h.engine.set_delegation_threshold(&who("alice"), 6_000),
        Err(GovernanceError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.set_delegation_threshold(&who("root"), 10_001),
        Err(GovernanceError::InvalidThreshold(10_001))
    ));
    assert_eq!(h.engine.delegation_threshold().version, 1);
}

// ---------------------------------------------------------------------------
// Execution and revert
// ---------------------------------------------------------------------------

async fn approved(h: &Harness) -> ProposalId {
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 100).await;
    h.pass_deadline();
    assert!(h.engine.close_voting(&id).await.unwrap().approved);
    id
}

#[tokio::test]
async fn executor_failure_keeps_proposal_approved_and_retry_succeeds() {
    let h = Harness::new();
    let id = approved(&h).await;
    h.executor.push(ExecStep::Fail("insufficient treasury"));

    let err = h.engine.execute(&id, json!({})).await.unwrap_err();
    assert!(matches!(err, GovernanceError::ExecutionFailed(_)));
    assert!(err.is_retryable());
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::Approved);
    assert_eq!(p.last_execution_error.as_deref(), Some("insufficient treasury"));
    assert_eq!(h.balance("proposer"), amount(900));

    h.engine.execute(&id, json!({})).await.unwrap();
    let p = h.engine.get_proposal(&id).unwrap();
    assert_eq!(p.status, ProposalStatus::Executed);
    assert_eq!(p.execution_attempts, 2);
    assert_eq!(p.last_execution_error, None);
}

#[tokio::test]
async fn interrupted_close_settles_on_retry() {
    let h = Harness::new();
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 100).await;
    h.pass_deadline();

    h.accounts
        .fail_next_credit(StoreError::Backend("balance service restarting".into()));
    let err = h.engine.close_voting(&id).await.unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::SettlementIncomplete {
            status: ProposalStatus::Approved,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::Approved);
    assert_eq!(h.balance("alice"), amount(900));

    let result = h.engine.close_voting(&id).await.unwrap();
    assert!(result.approved);
    assert_eq!(h.balance("alice"), amount(INITIAL_BALANCE));
    let voter = h
        .engine
        .list_escrows(&id)
        .unwrap()
        .into_iter()
        .find(|e| e.purpose == EscrowPurpose::VoteStake)
        .unwrap();
    assert_eq!(voter.state, EscrowState::Released);
}

#[tokio::test]
async fn interrupted_fee_release_finishes_on_retry() {
    let h = Harness::new();
    let id = approved(&h).await;

    h.accounts
        .fail_next_credit(StoreError::Backend("balance service restarting".into()));
    let err = h.engine.execute(&id, json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::SettlementIncomplete {
            status: ProposalStatus::Executed,
            ..
        }
    ));
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::Executed);
    assert_eq!(h.balance("proposer"), amount(900));

    let outcome = h.engine.execute(&id, json!({})).await.unwrap();
    assert_eq!(outcome.executor, SCRIPTED_KIND);
    assert_eq!(h.executor.invocations().len(), 1);
    assert_eq!(h.balance("proposer"), amount(INITIAL_BALANCE));
    let fee = h
        .engine
        .list_escrows(&id)
        .unwrap()
        .into_iter()
        .find(|e| e.purpose == EscrowPurpose::ProposerFee)
        .unwrap();
    assert_eq!(fee.state, EscrowState::Released);
}

#[tokio::test]
async fn unavailable_or_slow_executor_is_retryable() {
    let h = Harness::new();
    let id = approved(&h).await;
    h.executor.push(ExecStep::Unavailable);
    assert!(matches!(
        h.engine.execute(&id, json!({})).await,
        Err(GovernanceError::ExecutorUnavailable(_))
    ));

    h.executor.push(ExecStep::Hang(Duration::from_secs(5)));
    let err = h
        .engine
        .execute_with_timeout(&id, json!({}), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ExecutorUnavailable(_)));
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::Approved);
}

#[tokio::test]
async fn execute_requires_approval() {
    let h = Harness::new();
    let id = h.open(10).await;
    assert!(matches!(
        h.engine.execute(&id, json!({})).await,
        Err(GovernanceError::InvalidStateTransition {
            from: ProposalStatus::Open,
            to: ProposalStatus::Executed
        })
    ));
    assert!(h.executor.invocations().is_empty());
}

#[tokio::test]
async fn unknown_kind_has_no_executor() {
    let h = Harness::new();
    let id = h
        .engine
        .submit_proposal(ProposalSubmission::new(who("proposer"), details("nft_auction"), amount(10)))
        .await
        .unwrap()
        .id;
    h.engine.review_compliance(&id).await.unwrap();
    h.vote(&id, "alice", VoteChoice::Yes, 100).await;
    h.pass_deadline();
    h.engine.close_voting(&id).await.unwrap();
    assert!(matches!(
        h.engine.execute(&id, json!({})).await,
        Err(GovernanceError::UnknownProposalKind(kind)) if kind == "nft_auction"
    ));
}

#[tokio::test]
async fn parameter_change_proposal_updates_live_params() {
    let h = Harness::new();
    let id = h
        .engine
        .submit_proposal(ProposalSubmission::new(
            who("proposer"),
            details(PARAMETER_CHANGE_KIND),
            amount(10),
        ))
        .await
        .unwrap()
        .id;
    h.engine.review_compliance(&id).await.unwrap();
    h.vote(&id, "alice", VoteChoice::Yes, 100).await;
    h.pass_deadline();
    h.engine.close_voting(&id).await.unwrap();

    let outcome = h
        .engine
        .execute(&id, json!({"param": "minimum_fee", "value": 75}))
        .await
        .unwrap();
    assert_eq!(outcome.executor, PARAMETER_CHANGE_KIND);
    assert_eq!(h.params.get().minimum_fee, 75);
}

#[tokio::test]
async fn revert_requires_an_administrator() {
    let h = Harness::new();
    let id = h.open(10).await;
    assert!(matches!(
        h.engine.revert(&id, &who("alice"), "mine now").await,
        Err(GovernanceError::Unauthorized(_))
    ));
    assert_eq!(h.engine.get_proposal(&id).unwrap().status, ProposalStatus::Open);
}

#[tokio::test]
async fn revert_of_open_proposal_returns_voter_stake_and_forfeits_fee() {
    let h = Harness::new();
    let id = h.open(100).await;
    h.vote(&id, "alice", VoteChoice::Yes, 70).await;

    let p = h.engine.revert(&id, &who("root"), "duplicate of an earlier proposal").await.unwrap();
    assert_eq!(p.status, ProposalStatus::Reverted);
    assert_eq!(p.revert_reason.as_deref(), Some("duplicate of an earlier proposal"));
    assert_eq!(h.balance("alice"), amount(INITIAL_BALANCE));
    assert_eq!(h.balance("proposer"), amount(900));

    // A retried revert is acknowledged and changes nothing.
    let again = h.engine.revert(&id, &who("root"), "retry").await.unwrap();
    assert_eq!(again.revert_reason.as_deref(), Some("duplicate of an earlier proposal"));
    assert_eq!(h.balance("proposer"), amount(900));
}

#[tokio::test]
async fn revert_of_approved_proposal_leaves_released_stake_alone() {
    let h = Harness::new();
    let id = approved(&h).await;
    let before = h.engine.get_escrow(&id, &who("alice"), EscrowPurpose::VoteStake).unwrap();
    assert_eq!(before.state, EscrowState::Released);

    h.engine.revert(&id, &who("root"), "superseded").await.unwrap();
    let after = h.engine.get_escrow(&id, &who("alice"), EscrowPurpose::VoteStake).unwrap();
    assert_eq!(before, after);
    let fee = h.engine.get_escrow(&id, &who("proposer"), EscrowPurpose::ProposerFee).unwrap();
    assert_eq!(fee.state, EscrowState::Forfeited);
}

#[tokio::test]
async fn reads_of_unknown_records_are_not_found() {
    let h = Harness::new();
    let missing = ProposalId::new([9; 32]);
    assert!(matches!(h.engine.get_proposal(&missing), Err(GovernanceError::NotFound(_))));
    assert!(matches!(h.engine.list_votes(&missing), Err(GovernanceError::NotFound(_))));
    let id = h.open(10).await;
    assert!(matches!(h.engine.get_vote(&id, &who("alice")), Err(GovernanceError::NotFound(_))));
    h.vote(&id, "alice", VoteChoice::No, 5).await;
    assert_eq!(h.engine.get_vote(&id, &who("alice")).unwrap().choice, VoteChoice::No);
    assert_eq!(h.engine.list_proposals(Some(ProposalStatus::Open)).unwrap().len(), 1);
    assert!(h.engine.list_proposals(Some(ProposalStatus::Approved)).unwrap().is_empty());
}
