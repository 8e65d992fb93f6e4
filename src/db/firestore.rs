// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing `RaceStore`.
//!
//! Provides typed operations for:
//! - Races (status, denormalized counters, final results)
//! - Race participants (progress, ranks)
//! - Race baselines (health-platform anchors)

use crate::db::{
    baseline_doc_id, collections, participant_doc_id, resolve_batch, RaceStore, ResolvedBatch,
    StoreResult, WriteBatch,
};
use crate::error::AppError;
use crate::events::{ChangeEvent, EventBus};
use crate::models::{Baseline, Participant, Race, RaceStatus};
use futures_util::future::BoxFuture;
use futures_util::{stream, StreamExt, TryStreamExt};
use std::collections::BTreeMap;

const MAX_CONCURRENT_DB_OPS: usize = 50;
// Firestore limits transactions to 500 writes.
const MAX_TRANSACTION_WRITES: usize = 500;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
    bus: EventBus,
}

impl FirestoreDb {
    /// Create a new Firestore client publishing its change events on `bus`.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str, bus: EventBus) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id, bus).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
            bus,
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str, bus: EventBus) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
            bus,
        })
    }

    /// Offline client for tests. Every operation returns a database error.
    pub fn new_mock(bus: EventBus) -> Self {
        Self { client: None, bus }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Race Operations ─────────────────────────────────────────

    async fn get_race(&self, race_id: &str) -> Result<Option<Race>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RACES)
            .obj()
            .one(race_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_race(&self, race: Race) -> Result<(), AppError> {
        let before = self.get_race(&race.id).await?;
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::RACES)
            .document_id(&race.id)
            .object(&race)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if before.as_ref() != Some(&race) {
            self.bus.publish(vec![ChangeEvent::Race {
                before,
                after: Some(race),
            }]);
        }
        Ok(())
    }

    async fn races_with_status(&self, status: RaceStatus) -> Result<Vec<Race>, AppError> {
        let status_id = u64::from(status.id());
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RACES)
            .filter(move |q| q.for_all([q.field("statusId").eq(status_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Participant Operations ──────────────────────────────────

    async fn get_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RACE_PARTICIPANTS)
            .obj()
            .one(&participant_doc_id(race_id, user_id))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn participants_where(
        &self,
        field: &'static str,
        value: String,
    ) -> Result<Vec<Participant>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RACE_PARTICIPANTS)
            .filter(move |q| q.for_all([q.field(field).eq(value.as_str())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn insert_participant(&self, participant: Participant) -> Result<(), AppError> {
        let before = self
            .get_participant(&participant.race_id, &participant.user_id)
            .await?;
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::RACE_PARTICIPANTS)
            .document_id(participant_doc_id(&participant.race_id, &participant.user_id))
            .object(&participant)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.bus.publish(vec![ChangeEvent::Participant {
            before,
            after: Some(participant),
        }]);
        Ok(())
    }

    async fn delete_participant(&self, race_id: &str, user_id: &str) -> Result<bool, AppError> {
        let Some(before) = self.get_participant(race_id, user_id).await? else {
            return Ok(false);
        };
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::RACE_PARTICIPANTS)
            .document_id(participant_doc_id(race_id, user_id))
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.bus.publish(vec![ChangeEvent::Participant {
            before: Some(before),
            after: None,
        }]);
        Ok(true)
    }

    // ─── Baseline Operations ─────────────────────────────────────

    async fn get_baseline(&self, user_id: &str, race_id: &str) -> Result<Option<Baseline>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RACE_BASELINES)
            .obj()
            .one(&baseline_doc_id(user_id, race_id))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Atomic Batch Commit ─────────────────────────────────────

    /// Commit a write batch in one Firestore transaction.
    ///
    /// Every touched document is read through the transaction, so version
    /// preconditions and race patches see a consistent snapshot and Firestore
    /// aborts the commit if any of those documents changes before it lands.
    async fn commit(&self, batch: WriteBatch) -> Result<(), AppError> {
        if batch.is_empty() {
            return Ok(());
        }
        if batch.len() > MAX_TRANSACTION_WRITES {
            return Err(AppError::Database(format!(
                "Batch of {} writes exceeds transaction limit",
                batch.len()
            )));
        }

        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        let tx_client = client.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );

        // 1-2. Read current versions and check preconditions
        let resolved = match Self::read_and_resolve(&tx_client, batch).await {
            Ok(resolved) => resolved,
            Err(e) => {
                if let Err(rollback) = transaction.rollback().await {
                    tracing::warn!(error = %rollback, "Transaction rollback failed");
                }
                return Err(e);
            }
        };

        // 3. Stage every write
        for (id, baseline) in &resolved.baselines {
            client
                .fluent()
                .update()
                .in_col(collections::RACE_BASELINES)
                .document_id(id)
                .object(baseline)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add baseline to transaction: {}", e))
                })?;
        }

        for (id, participant) in &resolved.participants {
            client
                .fluent()
                .update()
                .in_col(collections::RACE_PARTICIPANTS)
                .document_id(id)
                .object(participant)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add participant to transaction: {}", e))
                })?;
        }

        for race in &resolved.races {
            client
                .fluent()
                .update()
                .in_col(collections::RACES)
                .document_id(&race.id)
                .object(race)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add race to transaction: {}", e))
                })?;
        }

        // 4. Commit atomically
        transaction.commit().await.map_err(commit_error)?;

        tracing::debug!(
            baselines = resolved.baselines.len(),
            participants = resolved.participants.len(),
            races = resolved.races.len(),
            "Batch committed"
        );

        self.bus.publish(resolved.events);
        Ok(())
    }

    /// Read every document a batch touches with `client` and fold the batch
    /// into them.
    async fn read_and_resolve(
        client: &firestore::FirestoreDb,
        batch: WriteBatch,
    ) -> Result<ResolvedBatch, AppError> {
        let participant_ids: Vec<String> = batch.participants.keys().cloned().collect();
        let participants: BTreeMap<String, Participant> = stream::iter(participant_ids)
            .map(|id| async move {
                let doc: Option<Participant> = client
                    .fluent()
                    .select()
                    .by_id_in(collections::RACE_PARTICIPANTS)
                    .obj()
                    .one(&id)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok::<_, AppError>(doc.map(|p| (id, p)))
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        let mut races = BTreeMap::new();
        for race_id in batch.race_patches.keys() {
            let race: Option<Race> = client
                .fluent()
                .select()
                .by_id_in(collections::RACES)
                .obj()
                .one(race_id)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            if let Some(race) = race {
                races.insert(race_id.clone(), race);
            }
        }

        resolve_batch(batch, &participants, &races, chrono::Utc::now())
    }
}

/// Map a transaction commit failure. Contention on a document read in the
/// transaction surfaces as `Aborted` and means our reads went stale.
fn commit_error(e: firestore::errors::FirestoreError) -> AppError {
    use firestore::errors::FirestoreError;
    match &e {
        FirestoreError::DataConflictError(_) => {
            AppError::Conflict(format!("Transaction conflict: {}", e))
        }
        FirestoreError::DatabaseError(db)
            if matches!(db.public.code.as_str(), "Aborted" | "FailedPrecondition") =>
        {
            AppError::Conflict(format!("Transaction aborted: {}", e))
        }
        _ => AppError::Database(format!("Transaction commit failed: {}", e)),
    }
}

impl RaceStore for FirestoreDb {
    fn get_race(&self, race_id: &str) -> BoxFuture<'static, StoreResult<Option<Race>>> {
        let store = self.clone();
        let race_id = race_id.to_string();
        Box::pin(async move { store.get_race(&race_id).await })
    }

    fn put_race(&self, race: Race) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.put_race(race).await })
    }

    fn races_with_status(&self, status: RaceStatus) -> BoxFuture<'static, StoreResult<Vec<Race>>> {
        let store = self.clone();
        Box::pin(async move { store.races_with_status(status).await })
    }

    fn get_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Participant>>> {
        let store = self.clone();
        let (race_id, user_id) = (race_id.to_string(), user_id.to_string());
        Box::pin(async move { store.get_participant(&race_id, &user_id).await })
    }

    fn race_participants(
        &self,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        let store = self.clone();
        let race_id = race_id.to_string();
        Box::pin(async move { store.participants_where("raceId", race_id).await })
    }

    fn participations_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        let store = self.clone();
        let user_id = user_id.to_string();
        Box::pin(async move { store.participants_where("userId", user_id).await })
    }

    fn insert_participant(&self, participant: Participant) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_participant(participant).await })
    }

    fn delete_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        let (race_id, user_id) = (race_id.to_string(), user_id.to_string());
        Box::pin(async move { store.delete_participant(&race_id, &user_id).await })
    }

    fn get_baseline(
        &self,
        user_id: &str,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Baseline>>> {
        let store = self.clone();
        let (user_id, race_id) = (user_id.to_string(), race_id.to_string());
        Box::pin(async move { store.get_baseline(&user_id, &race_id).await })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(batch).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_client_reports_database_error() {
        let (bus, _rx) = EventBus::channel();
        let db = FirestoreDb::new_mock(bus);

        let err = RaceStore::get_race(&db, "race-1").await.err().unwrap();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_needs_no_connection() {
        let (bus, _rx) = EventBus::channel();
        let db = FirestoreDb::new_mock(bus);
        assert!(RaceStore::commit(&db, WriteBatch::new()).await.is_ok());
    }

    #[test]
    fn test_aborted_commit_is_a_conflict() {
        use firestore::errors::{
            FirestoreDatabaseError, FirestoreError, FirestoreErrorPublicGenericDetails,
        };
        let error = |code: &str| {
            FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                FirestoreErrorPublicGenericDetails::new(code.to_string()),
                "status".to_string(),
                true,
            ))
        };

        assert!(matches!(commit_error(error("Aborted")), AppError::Conflict(_)));
        assert!(matches!(
            commit_error(error("Unavailable")),
            AppError::Database(_)
        ));
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let (bus, _rx) = EventBus::channel();
        let db = FirestoreDb::new_mock(bus);

        let mut batch = WriteBatch::new();
        for i in 0..=MAX_TRANSACTION_WRITES {
            batch.set_rank("race-1", &format!("user-{}", i), 1);
        }
        let err = RaceStore::commit(&db, batch).await.err().unwrap();
        assert!(matches!(err, AppError::Database(msg) if msg.contains("transaction limit")));
    }
}
