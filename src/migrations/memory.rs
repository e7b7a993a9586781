//! Migrating a standalone set of models, such as an import payload, without
//! touching the datastore.

use std::collections::BTreeMap;

use crate::error::{DatastoreError, MigrationError, Result};
use crate::event::{DbEvent, Model};
use crate::keys::Fqid;
use crate::types::{MigrationIndex, Position, PositionData};
use crate::writer::executor::now_timestamp;
use crate::writer::translator::translate;

use super::event_migrater::run_step;
use super::keyframes::InitialKeyframeModifier;
use super::migration::{Migration, MigrationChain};
use super::reader::MemoryMigrationReader;

/// Position all in-memory events are attributed to.
const SYNTHETIC_POSITION: Position = 1;

pub struct MemoryMigrationHandler {
    chain: MigrationChain,
}

impl MemoryMigrationHandler {
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        Ok(Self {
            chain: MigrationChain::new(migrations)?,
        })
    }

    pub fn target_migration_index(&self) -> MigrationIndex {
        self.chain.target_migration_index()
    }

    /// Bring `models`, valid under `start`, to the chain's target index.
    /// Models keep the positions they came with.
    pub fn migrate(
        &mut self,
        models: BTreeMap<Fqid, Model>,
        start: MigrationIndex,
    ) -> Result<BTreeMap<Fqid, Model>> {
        let target = self.chain.target_migration_index();
        if start > target {
            return Err(MigrationError::MismatchingMigrationIndices {
                datastore: start,
                target,
            }
            .into());
        }
        if start == target {
            return Ok(models);
        }

        let positions: BTreeMap<Fqid, Position> =
            models.iter().map(|(fqid, m)| (fqid.clone(), m.position)).collect();
        let event_target = self.chain.event_target_migration_index();
        let mut current = start;
        let mut models = models;

        if current < event_target {
            let mut events: Vec<DbEvent> = Vec::new();
            for (fqid, model) in &models {
                events.push(DbEvent::Create {
                    fqid: fqid.clone(),
                    fields: model.fields.clone(),
                });
                if model.deleted {
                    events.push(DbEvent::Delete { fqid: fqid.clone() });
                }
            }
            let mut position = PositionData {
                position: SYNTHETIC_POSITION,
                timestamp: now_timestamp(),
                user_id: 0,
                information: None,
                migration_index: current,
            };

            while current < event_target {
                let migration = self.chain.event_step(current).ok_or_else(|| {
                    DatastoreError::Internal(format!("no event migration from index {current}"))
                })?;
                let mut old = InitialKeyframeModifier::new(None, SYNTHETIC_POSITION, current);
                let mut new = InitialKeyframeModifier::new(None, SYNTHETIC_POSITION, current + 1);
                events = run_step(migration.as_mut(), &mut old, &mut new, &position, events)?;
                models = new.into_models();
                current += 1;
                position.migration_index = current;
            }
        }

        for migration in self.chain.model_steps_after(current) {
            let events = {
                let reader = MemoryMigrationReader::new(&models);
                migration.migrate_models(&reader)?
            };
            for request_event in events.unwrap_or_default() {
                for event in translate(&request_event)? {
                    let before = models.remove(event.fqid());
                    let after = event.apply(before, SYNTHETIC_POSITION)?;
                    models.insert(event.fqid().clone(), after);
                }
            }
        }

        for (fqid, model) in models.iter_mut() {
            if let Some(position) = positions.get(fqid) {
                model.position = *position;
            }
        }
        Ok(models)
    }
}
