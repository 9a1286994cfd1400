//! Tag store - Creation, lookup and lifecycle of payment tags.
//!
//! Lookups here never touch a balance. The initial balance of a new tag is
//! written through the ledger writer as a regular `load` entry, so every
//! balance is explained by history from the first cent.

use crate::{
    core::{
        Ledger,
        ledger::{self, LedgerEntry, LoadOptions},
        reference,
        retry::atomic,
    },
    entities::{Tag, TagStatus, Transaction, tag, transaction},
    errors::{Error, Result},
    money::Money,
};
use chrono::Utc;
use sea_orm::{Condition, PaginatorTrait, QuerySelect, Set, SqlErr, prelude::*};
use tracing::{debug, info, instrument};

/// Fields for a new tag.
#[derive(Debug, Clone)]
pub struct NewTag {
    pub uid: String,
    pub short_code: Option<String>,
    pub number: Option<String>,
    /// Recorded as a `load` entry when positive
    pub initial_balance: Money,
    /// Staff member registering the tag
    pub actor_id: i64,
}

impl NewTag {
    #[must_use]
    pub fn new(uid: impl Into<String>, actor_id: i64) -> Self {
        Self {
            uid: uid.into(),
            short_code: None,
            number: None,
            initial_balance: Money::ZERO,
            actor_id,
        }
    }
}

/// Retrieves a tag by its database ID.
pub async fn get_tag_by_id<C>(db: &C, tag_id: i64) -> Result<Option<tag::Model>>
where
    C: ConnectionTrait,
{
    Tag::find_by_id(tag_id).one(db).await.map_err(Into::into)
}

/// Resolves user input to exactly one tag.
///
/// The input is matched against UID, short code and exact number at once;
/// it must name a single tag across all three. Failing that, all-digit input
/// is tried as a number prefix, which must also match a single tag.
///
/// # Errors
/// `Validation` for blank input, `TagNotFound` when nothing or more than one
/// tag matches.
pub async fn resolve_tag<C>(db: &C, identifier: &str) -> Result<tag::Model>
where
    C: ConnectionTrait,
{
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(Error::Validation {
            message: "tag identifier cannot be empty".to_string(),
        });
    }

    let not_found = || Error::TagNotFound {
        identifier: identifier.to_string(),
    };

    let mut exact = Tag::find()
        .filter(any_identifier(identifier))
        .limit(2)
        .all(db)
        .await?;
    match exact.len() {
        0 => {}
        1 => return Ok(exact.remove(0)),
        _ => {
            debug!(identifier, "Identifier names more than one tag");
            return Err(not_found());
        }
    }

    if !identifier.chars().all(|c| c.is_ascii_digit()) {
        return Err(not_found());
    }

    let mut candidates = Tag::find()
        .filter(tag::Column::Number.starts_with(identifier))
        .limit(2)
        .all(db)
        .await?;

    if candidates.len() == 1 {
        Ok(candidates.remove(0))
    } else {
        debug!(identifier, matches = candidates.len(), "Tag prefix did not resolve");
        Err(not_found())
    }
}

/// Tags whose UID, short code or number equals `value`.
fn any_identifier(value: &str) -> Condition {
    Condition::any()
        .add(tag::Column::Uid.eq(value))
        .add(tag::Column::ShortCode.eq(value))
        .add(tag::Column::Number.eq(value))
}

/// Fails with `DuplicateTag` if any identifier is already used by a tag,
/// in any of the three identifier columns.
async fn ensure_identifiers_free<C>(db: &C, new: &NewTag) -> Result<()>
where
    C: ConnectionTrait,
{
    let values = [
        Some(new.uid.as_str()),
        new.short_code.as_deref(),
        new.number.as_deref(),
    ];

    for value in values.into_iter().flatten() {
        let taken = Tag::find().filter(any_identifier(value)).count(db).await? > 0;
        if taken {
            return Err(Error::DuplicateTag {
                identifier: value.to_string(),
            });
        }
    }
    Ok(())
}

/// Maps a UNIQUE index violation on the tags table to `DuplicateTag`.
fn duplicate_or_database(err: DbErr, new: &NewTag) -> Error {
    let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() else {
        return Error::from(err);
    };

    let identifier = if message.contains("short_code") {
        new.short_code.clone()
    } else if message.contains("number") {
        new.number.clone()
    } else {
        None
    };
    Error::DuplicateTag {
        identifier: identifier.unwrap_or_else(|| new.uid.clone()),
    }
}

impl Ledger {
    /// Registers a tag, loading its initial balance in the same unit.
    ///
    /// # Errors
    /// `Validation` for a blank UID, `InvalidAmount` for a negative initial
    /// balance, `DuplicateTag` when an identifier is taken.
    #[instrument(skip(self, new), fields(uid = %new.uid))]
    pub async fn create_tag(&self, new: NewTag) -> Result<tag::Model> {
        let new = NewTag {
            uid: new.uid.trim().to_string(),
            short_code: normalize(new.short_code),
            number: normalize(new.number),
            ..new
        };

        if new.uid.is_empty() {
            return Err(Error::Validation {
                message: "tag UID cannot be empty".to_string(),
            });
        }
        if new.initial_balance.is_negative() {
            return Err(Error::InvalidAmount {
                amount: new.initial_balance.to_string(),
            });
        }

        let tag = atomic!(self, "create_tag", |txn| {
            async {
                ensure_identifiers_free(&txn, &new).await?;

                let now = Utc::now();
                let tag = tag::ActiveModel {
                    uid: Set(new.uid.clone()),
                    short_code: Set(new.short_code.clone()),
                    number: Set(new.number.clone()),
                    balance: Set(0),
                    status: Set(TagStatus::Active.as_str().to_string()),
                    is_issued: Set(false),
                    issued_at: Set(None),
                    attendee_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await
                .map_err(|err| duplicate_or_database(err, &new))?;

                if !new.initial_balance.is_positive() {
                    return Ok(tag);
                }

                let entry = LedgerEntry::Load {
                    tag_id: tag.id,
                    amount: new.initial_balance,
                    actor_id: new.actor_id,
                    options: LoadOptions {
                        description: Some("Initial balance".to_string()),
                        reference: Some(reference::initial_balance(now, tag.id)),
                        ..Default::default()
                    },
                };
                ledger::append_entry(&txn, entry).await?;

                get_tag_by_id(&txn, tag.id)
                    .await?
                    .ok_or_else(|| Error::TagNotFound {
                        identifier: tag.id.to_string(),
                    })
            }
            .await
        })?;

        info!(tag_id = tag.id, balance = %Money::from_cents(tag.balance), "Tag created");
        Ok(tag)
    }

    /// Changes a tag's lifecycle status. Inactive and blocked tags reject
    /// all balance mutations.
    #[instrument(skip(self))]
    pub async fn set_tag_status(&self, tag_id: i64, status: TagStatus) -> Result<tag::Model> {
        let tag = atomic!(self, "set_tag_status", |txn| {
            async {
                let mut tag: tag::ActiveModel = lock_tag(&txn, tag_id).await?.into();
                tag.status = Set(status.as_str().to_string());
                tag.updated_at = Set(Utc::now());
                tag.update(&txn).await.map_err(Error::from)
            }
            .await
        })?;

        info!(tag_id, status = %status, "Tag status changed");
        Ok(tag)
    }

    /// Hands a tag to an attendee.
    ///
    /// # Errors
    /// `TagNotFound`; `Validation` when the tag is already linked to a
    /// different attendee.
    #[instrument(skip(self))]
    pub async fn issue_tag(&self, tag_id: i64, attendee_id: i64) -> Result<tag::Model> {
        let tag = atomic!(self, "issue_tag", |txn| {
            async {
                let current = lock_tag(&txn, tag_id).await?;
                if current
                    .attendee_id
                    .is_some_and(|existing| existing != attendee_id)
                {
                    return Err(Error::Validation {
                        message: format!("tag {tag_id} is already issued to another attendee"),
                    });
                }

                let now = Utc::now();
                let issued_at = current.issued_at.unwrap_or(now);
                let mut tag: tag::ActiveModel = current.into();
                tag.is_issued = Set(true);
                tag.issued_at = Set(Some(issued_at));
                tag.attendee_id = Set(Some(attendee_id));
                tag.updated_at = Set(now);
                tag.update(&txn).await.map_err(Error::from)
            }
            .await
        })?;

        info!(tag_id, attendee_id, "Tag issued");
        Ok(tag)
    }

    /// Deletes a tag that was never used.
    ///
    /// # Errors
    /// `TagNotFound`; `TagInUse` when the tag has ledger history or is linked
    /// to an attendee.
    #[instrument(skip(self))]
    pub async fn delete_tag(&self, tag_id: i64) -> Result<()> {
        atomic!(self, "delete_tag", |txn| {
            async {
                let tag = lock_tag(&txn, tag_id).await?;
                let history = Transaction::find()
                    .filter(transaction::Column::TagId.eq(tag_id))
                    .count(&txn)
                    .await?;

                if history > 0 || tag.attendee_id.is_some() {
                    debug!(tag_id, history, "Refusing to delete tag in use");
                    return Err(Error::TagInUse { tag_id });
                }

                Tag::delete_by_id(tag_id).exec(&txn).await?;
                Ok::<_, Error>(())
            }
            .await
        })?;

        info!(tag_id, "Tag deleted");
        Ok(())
    }

    /// Looks a tag up by any of its identifiers.
    pub async fn find_tag(&self, identifier: &str) -> Result<tag::Model> {
        resolve_tag(self.database(), identifier).await
    }
}

async fn lock_tag<C>(conn: &C, tag_id: i64) -> Result<tag::Model>
where
    C: ConnectionTrait,
{
    Tag::find_by_id(tag_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| Error::TagNotFound {
            identifier: tag_id.to_string(),
        })
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
