//! MongoDB binding for the store seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{
    AggregateOptions, ClientOptions, CountOptions, Credential, DeleteOptions, FindOneAndDeleteOptions,
    FindOneAndReplaceOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions, Hint,
    IndexOptions, ReplaceOptions, ReturnDocument, UpdateModifications, UpdateOptions,
};
use mongodb::results::UpdateResult;
use mongodb::{Client, Collection, Database, IndexModel};

use querygate::{
    AggregateSpec, CollectionOp, CountSpec, FindAndModifySpec, FindOneSpec, FindSpec, IndexRef,
    IndexSpec, Operation, UpdateModification, WriteSpec,
};

use super::{StoreConnector, StoreHandle};
use crate::types::{StoreError, TargetDescriptor};

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        StoreError::new(e.to_string())
    }
}

/// Connects to MongoDB deployments with the official driver.
#[derive(Debug, Default, Clone)]
pub struct MongoConnector {
    app_name: Option<String>,
}

impl MongoConnector {
    pub fn new() -> Self {
        Self {
            app_name: Some("querygate".to_string()),
        }
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(
        &self,
        target: &TargetDescriptor,
        timeout: Duration,
    ) -> Result<Arc<dyn StoreHandle>, StoreError> {
        let mut options = ClientOptions::parse(&target.address).await?;
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        if options.app_name.is_none() {
            options.app_name = self.app_name.clone();
        }
        if let Some(credentials) = &target.credentials {
            let mut credential = Credential::default();
            credential.username = Some(credentials.username.clone());
            credential.password = Some(credentials.password.clone());
            credential.source = credentials.auth_source.clone();
            options.credential = Some(credential);
        }

        let client = Client::with_options(options)?;
        let handle = MongoHandle::new(client, &target.default_namespace);
        // Server selection is lazy; force it so failures surface here.
        handle.ping().await?;

        tracing::debug!(
            "Connected to {} (namespace {})",
            target.redacted_address(),
            target.default_namespace
        );
        Ok(Arc::new(handle))
    }
}

/// One driver client bound to a default database.
pub struct MongoHandle {
    client: Client,
    database: String,
    closed: AtomicBool,
}

impl MongoHandle {
    pub fn new(client: Client, database: &str) -> Self {
        Self {
            client,
            database: database.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    fn db(&self) -> Database {
        self.client.database(&self.database)
    }

    fn admin(&self) -> Database {
        self.client.database("admin")
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db().collection::<Document>(name)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.admin().run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn run_collection(&self, name: &str, op: &CollectionOp) -> Result<Bson, StoreError> {
        let coll = self.collection(name);
        match op {
            CollectionOp::Find(spec) => {
                let cursor = coll.find(spec.filter.clone(), find_options(spec)).await?;
                let docs: Vec<Document> = cursor.try_collect().await?;
                Ok(documents(docs))
            }
            CollectionOp::FindOne { filter, options } => {
                let found = coll
                    .find_one(filter.clone(), find_one_options(options))
                    .await?;
                Ok(found.map(Bson::Document).unwrap_or(Bson::Null))
            }
            CollectionOp::Aggregate { pipeline, options } => {
                let cursor = coll
                    .aggregate(pipeline.clone(), aggregate_options(options))
                    .await?;
                let docs: Vec<Document> = cursor.try_collect().await?;
                Ok(documents(docs))
            }
            CollectionOp::CountDocuments { filter, options } => {
                let n = coll
                    .count_documents(filter.clone(), count_options(options))
                    .await?;
                Ok(Bson::Int64(n as i64))
            }
            CollectionOp::EstimatedDocumentCount => {
                let n = coll.estimated_document_count(None).await?;
                Ok(Bson::Int64(n as i64))
            }
            CollectionOp::Distinct { field, filter } => {
                let values = coll.distinct(field, filter.clone(), None).await?;
                Ok(Bson::Array(values))
            }
            CollectionOp::Indexes => {
                let response = self
                    .db()
                    .run_command(doc! { "listIndexes": name }, None)
                    .await?;
                Ok(first_batch(response))
            }
            CollectionOp::Stats => {
                let response = self
                    .db()
                    .run_command(doc! { "collStats": name }, None)
                    .await?;
                Ok(Bson::Document(response))
            }
            CollectionOp::InsertOne(document) => {
                let result = coll.insert_one(document.clone(), None).await?;
                Ok(Bson::Document(doc! {
                    "acknowledged": true,
                    "insertedId": result.inserted_id,
                }))
            }
            CollectionOp::InsertMany(docs) => {
                let result = coll.insert_many(docs.clone(), None).await?;
                let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
                ids.sort_by_key(|(index, _)| *index);
                let inserted: Document = ids
                    .into_iter()
                    .map(|(index, id)| (index.to_string(), id))
                    .collect();
                Ok(Bson::Document(doc! {
                    "acknowledged": true,
                    "insertedCount": inserted.len() as i64,
                    "insertedIds": inserted,
                }))
            }
            CollectionOp::UpdateOne {
                filter,
                update,
                options,
            } => {
                let result = coll
                    .update_one(filter.clone(), modifications(update), update_options(options))
                    .await?;
                Ok(update_result(result))
            }
            CollectionOp::UpdateMany {
                filter,
                update,
                options,
            } => {
                let result = coll
                    .update_many(filter.clone(), modifications(update), update_options(options))
                    .await?;
                Ok(update_result(result))
            }
            CollectionOp::ReplaceOne {
                filter,
                replacement,
                options,
            } => {
                let result = coll
                    .replace_one(filter.clone(), replacement, replace_options(options))
                    .await?;
                Ok(update_result(result))
            }
            CollectionOp::DeleteOne { filter, options } => {
                let result = coll
                    .delete_one(filter.clone(), delete_options(options))
                    .await?;
                Ok(deleted(result.deleted_count))
            }
            CollectionOp::DeleteMany { filter, options } => {
                let result = coll
                    .delete_many(filter.clone(), delete_options(options))
                    .await?;
                Ok(deleted(result.deleted_count))
            }
            CollectionOp::FindOneAndUpdate {
                filter,
                update,
                options,
            } => {
                let found = coll
                    .find_one_and_update(
                        filter.clone(),
                        modifications(update),
                        find_one_and_update_options(options),
                    )
                    .await?;
                Ok(found.map(Bson::Document).unwrap_or(Bson::Null))
            }
            CollectionOp::FindOneAndDelete { filter, options } => {
                let found = coll
                    .find_one_and_delete(filter.clone(), find_one_and_delete_options(options))
                    .await?;
                Ok(found.map(Bson::Document).unwrap_or(Bson::Null))
            }
            CollectionOp::FindOneAndReplace {
                filter,
                replacement,
                options,
            } => {
                let found = coll
                    .find_one_and_replace(
                        filter.clone(),
                        replacement,
                        find_one_and_replace_options(options),
                    )
                    .await?;
                Ok(found.map(Bson::Document).unwrap_or(Bson::Null))
            }
            CollectionOp::CreateIndex { keys, options } => {
                let mut model = IndexModel::default();
                model.keys = keys.clone();
                model.options = Some(index_options(options));
                let result = coll.create_index(model, None).await?;
                Ok(Bson::String(result.index_name))
            }
            CollectionOp::DropIndex(index) => {
                let index = match index {
                    IndexRef::Name(n) => Bson::String(n.clone()),
                    IndexRef::Keys(k) => Bson::Document(k.clone()),
                };
                let response = self
                    .db()
                    .run_command(doc! { "dropIndexes": name, "index": index }, None)
                    .await?;
                Ok(Bson::Document(response))
            }
        }
    }

    /// `$currentOp` aggregation, falling back to the legacy command.
    async fn current_op(&self, filter: &Document) -> Result<Bson, StoreError> {
        let mut stage = doc! { "allUsers": true, "idleSessions": false };
        merge(&mut stage, filter);

        let admin = self.admin();
        let inprog = match admin
            .aggregate(vec![doc! { "$currentOp": stage }], None)
            .await
        {
            Ok(cursor) => {
                let ops: Vec<Document> = cursor.try_collect().await?;
                documents(ops)
            }
            Err(e) => {
                tracing::warn!("$currentOp aggregation failed, using currentOp command: {e}");
                let mut command = doc! { "currentOp": true };
                merge(&mut command, filter);
                let mut response = admin.run_command(command, None).await?;
                response
                    .remove("inprog")
                    .unwrap_or(Bson::Array(Vec::new()))
            }
        };

        Ok(Bson::Document(doc! { "inprog": inprog }))
    }
}

#[async_trait]
impl StoreHandle for MongoHandle {
    async fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Liveness probe failed: {e}");
                false
            }
        }
    }

    async fn run(&self, operation: &Operation) -> Result<Bson, StoreError> {
        match operation {
            Operation::Collection { collection, op } => self.run_collection(collection, op).await,
            Operation::RunCommand(command) => {
                Ok(Bson::Document(self.db().run_command(command.clone(), None).await?))
            }
            Operation::AdminCommand(command) => Ok(Bson::Document(
                self.admin().run_command(command.clone(), None).await?,
            )),
            Operation::CurrentOp(filter) => self.current_op(filter).await,
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names = self.db().list_collection_names(None).await?;
        names.sort();
        Ok(names)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.client.clone().shutdown().await;
        }
    }
}

fn merge(target: &mut Document, extra: &Document) {
    for (key, value) in extra {
        target.insert(key.clone(), value.clone());
    }
}

fn documents(docs: Vec<Document>) -> Bson {
    Bson::Array(docs.into_iter().map(Bson::Document).collect())
}

/// `cursor.firstBatch` of a cursor-returning command response.
fn first_batch(mut response: Document) -> Bson {
    match response.remove("cursor") {
        Some(Bson::Document(mut cursor)) => cursor
            .remove("firstBatch")
            .unwrap_or(Bson::Array(Vec::new())),
        _ => Bson::Document(response),
    }
}

fn deleted(count: u64) -> Bson {
    Bson::Document(doc! { "acknowledged": true, "deletedCount": count as i64 })
}

fn update_result(result: UpdateResult) -> Bson {
    let upserted_count = i64::from(result.upserted_id.is_some());
    Bson::Document(doc! {
        "acknowledged": true,
        "matchedCount": result.matched_count as i64,
        "modifiedCount": result.modified_count as i64,
        "upsertedCount": upserted_count,
        "upsertedId": result.upserted_id.unwrap_or(Bson::Null),
    })
}

fn hint(index: &Option<IndexRef>) -> Option<Hint> {
    index.as_ref().map(|index| match index {
        IndexRef::Name(name) => Hint::Name(name.clone()),
        IndexRef::Keys(keys) => Hint::Keys(keys.clone()),
    })
}

fn modifications(update: &UpdateModification) -> UpdateModifications {
    match update {
        UpdateModification::Document(d) => UpdateModifications::Document(d.clone()),
        UpdateModification::Pipeline(p) => UpdateModifications::Pipeline(p.clone()),
    }
}

fn find_options(spec: &FindSpec) -> FindOptions {
    let mut options = FindOptions::default();
    options.projection = spec.projection.clone();
    options.sort = spec.sort.clone();
    options.skip = spec.skip;
    options.limit = Some(spec.limit);
    options
}

fn find_one_options(spec: &FindOneSpec) -> FindOneOptions {
    let mut options = FindOneOptions::default();
    options.projection = spec.projection.clone();
    options.sort = spec.sort.clone();
    options.skip = spec.skip;
    options
}

fn aggregate_options(spec: &AggregateSpec) -> AggregateOptions {
    let mut options = AggregateOptions::default();
    options.allow_disk_use = spec.allow_disk_use;
    options.batch_size = spec.batch_size;
    options.max_time = spec.max_time_ms.map(Duration::from_millis);
    options.comment = spec.comment.clone().map(Into::into);
    options.hint = hint(&spec.hint);
    options
}

fn count_options(spec: &CountSpec) -> CountOptions {
    let mut options = CountOptions::default();
    options.limit = spec.limit;
    options.skip = spec.skip;
    options.max_time = spec.max_time_ms.map(Duration::from_millis);
    options.hint = hint(&spec.hint);
    options
}

fn update_options(spec: &WriteSpec) -> UpdateOptions {
    let mut options = UpdateOptions::default();
    options.upsert = spec.upsert;
    options.array_filters = spec.array_filters.clone();
    options.hint = hint(&spec.hint);
    options
}

fn replace_options(spec: &WriteSpec) -> ReplaceOptions {
    let mut options = ReplaceOptions::default();
    options.upsert = spec.upsert;
    options.hint = hint(&spec.hint);
    options
}

fn delete_options(spec: &WriteSpec) -> DeleteOptions {
    let mut options = DeleteOptions::default();
    options.hint = hint(&spec.hint);
    options
}

fn return_document(spec: &FindAndModifySpec) -> ReturnDocument {
    if spec.return_after {
        ReturnDocument::After
    } else {
        ReturnDocument::Before
    }
}

fn find_one_and_update_options(spec: &FindAndModifySpec) -> FindOneAndUpdateOptions {
    let mut options = FindOneAndUpdateOptions::default();
    options.projection = spec.projection.clone();
    options.sort = spec.sort.clone();
    options.upsert = spec.upsert;
    options.array_filters = spec.array_filters.clone();
    options.return_document = Some(return_document(spec));
    options
}

fn find_one_and_delete_options(spec: &FindAndModifySpec) -> FindOneAndDeleteOptions {
    let mut options = FindOneAndDeleteOptions::default();
    options.projection = spec.projection.clone();
    options.sort = spec.sort.clone();
    options
}

fn find_one_and_replace_options(spec: &FindAndModifySpec) -> FindOneAndReplaceOptions {
    let mut options = FindOneAndReplaceOptions::default();
    options.projection = spec.projection.clone();
    options.sort = spec.sort.clone();
    options.upsert = spec.upsert;
    options.return_document = Some(return_document(spec));
    options
}

fn index_options(spec: &IndexSpec) -> IndexOptions {
    let mut options = IndexOptions::default();
    options.name = spec.name.clone();
    options.unique = spec.unique;
    options.sparse = spec.sparse;
    options.expire_after = spec.expire_after_secs.map(Duration::from_secs);
    options.partial_filter_expression = spec.partial_filter.clone();
    options.background = spec.background;
    options
}
