//! Request events → stored events.

use crate::error::{DatastoreError, Result};
use crate::event::DbEvent;
use crate::keys::{assert_writable_field, Fqid};
use crate::types::Record;

use super::requests::RequestEvent;

/// Normalise one request event. Updates split into an `Update` for non-null
/// values, a `DeleteFields` for null values and a `ListUpdate` for list
/// changes, in that order.
pub fn translate(event: &RequestEvent) -> Result<Vec<DbEvent>> {
    match event {
        RequestEvent::Create { fqid, fields } => {
            assert_writable_fields(fqid, fields.keys())?;
            let fields: Record = fields
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Ok(vec![DbEvent::Create {
                fqid: fqid.clone(),
                fields,
            }])
        }
        RequestEvent::Update {
            fqid,
            fields,
            list_fields,
        } => {
            assert_writable_fields(fqid, fields.keys())?;
            assert_writable_fields(fqid, list_fields.add.keys().chain(list_fields.remove.keys()))?;
            if fields.is_empty() && list_fields.is_empty() {
                return Err(DatastoreError::InvalidFormat(format!(
                    "Update of {fqid} carries no fields"
                )));
            }

            let mut out = Vec::new();
            let (removed, updated): (Vec<_>, Vec<_>) =
                fields.iter().partition(|(_, value)| value.is_null());
            if !updated.is_empty() {
                out.push(DbEvent::Update {
                    fqid: fqid.clone(),
                    fields: updated
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                });
            }
            if !removed.is_empty() {
                out.push(DbEvent::DeleteFields {
                    fqid: fqid.clone(),
                    fields: removed.into_iter().map(|(k, _)| k.clone()).collect(),
                });
            }
            if !list_fields.is_empty() {
                out.push(DbEvent::ListUpdate {
                    fqid: fqid.clone(),
                    add: list_fields.add.clone(),
                    remove: list_fields.remove.clone(),
                });
            }
            Ok(out)
        }
        RequestEvent::Delete { fqid } => Ok(vec![DbEvent::Delete { fqid: fqid.clone() }]),
        RequestEvent::Restore { fqid } => Ok(vec![DbEvent::Restore { fqid: fqid.clone() }]),
    }
}

fn assert_writable_fields<'a, I>(fqid: &Fqid, fields: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    fields
        .into_iter()
        .try_for_each(|f| assert_writable_field(fqid.collection(), f))
}
