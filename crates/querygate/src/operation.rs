//! Operation planner: maps a parsed call onto one allow-listed store operation.
//!
//! The mapping from `(TargetKind, method name)` to [`OperationKind`] is pure and
//! closed; adding a method means adding a variant here.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::args::parse_shell_args;
use crate::chain::{parse_post_path, retained_modifiers, scan_chain};
use crate::tokenizer::tokenize;
use crate::types::{
    ChainedModifier, ModifierMethod, ParsedCall, PostProcessPath, QueryError, QueryResult,
    TargetKind,
};

/// Result cap applied to `find` when no `.limit()` is chained.
pub const DEFAULT_FIND_LIMIT: i64 = 100;

/// Every method the dispatcher will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Find,
    FindOne,
    Aggregate,
    CountDocuments,
    EstimatedDocumentCount,
    Distinct,
    Indexes,
    Stats,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    ReplaceOne,
    DeleteOne,
    DeleteMany,
    FindOneAndUpdate,
    FindOneAndDelete,
    FindOneAndReplace,
    CreateIndex,
    DropIndex,
    RunCommand,
    AdminCommand,
    CurrentOp,
}

/// Coarse grouping of operations, for reviewers and audit logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Read,
    Write,
    IndexAdmin,
    ServerAdmin,
}

const COLLECTION_METHODS: &[OperationKind] = &[
    OperationKind::Find,
    OperationKind::FindOne,
    OperationKind::Aggregate,
    OperationKind::CountDocuments,
    OperationKind::EstimatedDocumentCount,
    OperationKind::Distinct,
    OperationKind::Indexes,
    OperationKind::Stats,
    OperationKind::InsertOne,
    OperationKind::InsertMany,
    OperationKind::UpdateOne,
    OperationKind::UpdateMany,
    OperationKind::ReplaceOne,
    OperationKind::DeleteOne,
    OperationKind::DeleteMany,
    OperationKind::FindOneAndUpdate,
    OperationKind::FindOneAndDelete,
    OperationKind::FindOneAndReplace,
    OperationKind::CreateIndex,
    OperationKind::DropIndex,
];

impl OperationKind {
    /// Resolve the allow-listed operation for a call, or fail naming the method.
    pub fn from_call(target_kind: TargetKind, method: &str) -> QueryResult<Self> {
        match target_kind {
            TargetKind::RunCommand => Ok(OperationKind::RunCommand),
            TargetKind::AdminCommand => Ok(OperationKind::AdminCommand),
            TargetKind::CurrentOp => Ok(OperationKind::CurrentOp),
            TargetKind::CollectionMethod | TargetKind::GetCollectionMethod => COLLECTION_METHODS
                .iter()
                .copied()
                .find(|kind| kind.as_str() == method)
                .ok_or_else(|| QueryError::UnsupportedOperation(method.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Find => "find",
            OperationKind::FindOne => "findOne",
            OperationKind::Aggregate => "aggregate",
            OperationKind::CountDocuments => "countDocuments",
            OperationKind::EstimatedDocumentCount => "estimatedDocumentCount",
            OperationKind::Distinct => "distinct",
            OperationKind::Indexes => "indexes",
            OperationKind::Stats => "stats",
            OperationKind::InsertOne => "insertOne",
            OperationKind::InsertMany => "insertMany",
            OperationKind::UpdateOne => "updateOne",
            OperationKind::UpdateMany => "updateMany",
            OperationKind::ReplaceOne => "replaceOne",
            OperationKind::DeleteOne => "deleteOne",
            OperationKind::DeleteMany => "deleteMany",
            OperationKind::FindOneAndUpdate => "findOneAndUpdate",
            OperationKind::FindOneAndDelete => "findOneAndDelete",
            OperationKind::FindOneAndReplace => "findOneAndReplace",
            OperationKind::CreateIndex => "createIndex",
            OperationKind::DropIndex => "dropIndex",
            OperationKind::RunCommand => "runCommand",
            OperationKind::AdminCommand => "adminCommand",
            OperationKind::CurrentOp => "currentOp",
        }
    }

    pub fn class(&self) -> OperationClass {
        match self {
            OperationKind::Find
            | OperationKind::FindOne
            | OperationKind::Aggregate
            | OperationKind::CountDocuments
            | OperationKind::EstimatedDocumentCount
            | OperationKind::Distinct
            | OperationKind::Indexes
            | OperationKind::Stats => OperationClass::Read,
            OperationKind::InsertOne
            | OperationKind::InsertMany
            | OperationKind::UpdateOne
            | OperationKind::UpdateMany
            | OperationKind::ReplaceOne
            | OperationKind::DeleteOne
            | OperationKind::DeleteMany
            | OperationKind::FindOneAndUpdate
            | OperationKind::FindOneAndDelete
            | OperationKind::FindOneAndReplace => OperationClass::Write,
            OperationKind::CreateIndex | OperationKind::DropIndex => OperationClass::IndexAdmin,
            OperationKind::RunCommand | OperationKind::AdminCommand | OperationKind::CurrentOp => {
                OperationClass::ServerAdmin
            }
        }
    }

    /// Methods callable on a collection handle.
    pub fn collection_methods() -> &'static [OperationKind] {
        COLLECTION_METHODS
    }
}

/// Index named either by its name or by its key pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexRef {
    Name(String),
    Keys(Document),
}

/// Update argument: a modifier document or an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateModification {
    Document(Document),
    Pipeline(Vec<Document>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindSpec {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneSpec {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSpec {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
    pub max_time_ms: Option<u64>,
    pub comment: Option<String>,
    pub hint: Option<IndexRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountSpec {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub max_time_ms: Option<u64>,
    pub hint: Option<IndexRef>,
}

/// Options shared by update, replace and delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSpec {
    pub upsert: Option<bool>,
    pub array_filters: Option<Vec<Document>>,
    pub hint: Option<IndexRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifySpec {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub upsert: Option<bool>,
    /// Return the post-image instead of the pre-image.
    pub return_after: bool,
    pub array_filters: Option<Vec<Document>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    pub expire_after_secs: Option<u64>,
    pub partial_filter: Option<Document>,
    pub background: Option<bool>,
}

/// Operations scoped to one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOp {
    Find(FindSpec),
    FindOne {
        filter: Document,
        options: FindOneSpec,
    },
    Aggregate {
        pipeline: Vec<Document>,
        options: AggregateSpec,
    },
    CountDocuments {
        filter: Document,
        options: CountSpec,
    },
    EstimatedDocumentCount,
    Distinct {
        field: String,
        filter: Document,
    },
    Indexes,
    Stats,
    InsertOne(Document),
    InsertMany(Vec<Document>),
    UpdateOne {
        filter: Document,
        update: UpdateModification,
        options: WriteSpec,
    },
    UpdateMany {
        filter: Document,
        update: UpdateModification,
        options: WriteSpec,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        options: WriteSpec,
    },
    DeleteOne {
        filter: Document,
        options: WriteSpec,
    },
    DeleteMany {
        filter: Document,
        options: WriteSpec,
    },
    FindOneAndUpdate {
        filter: Document,
        update: UpdateModification,
        options: FindAndModifySpec,
    },
    FindOneAndDelete {
        filter: Document,
        options: FindAndModifySpec,
    },
    FindOneAndReplace {
        filter: Document,
        replacement: Document,
        options: FindAndModifySpec,
    },
    CreateIndex {
        keys: Document,
        options: IndexSpec,
    },
    DropIndex(IndexRef),
}

/// A fully-typed store operation, ready to hand to a store binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Collection { collection: String, op: CollectionOp },
    /// Command against the target's default database.
    RunCommand(Document),
    /// Command against the `admin` database.
    AdminCommand(Document),
    /// In-progress operations, filtered by the given document.
    CurrentOp(Document),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::RunCommand(_) => OperationKind::RunCommand,
            Operation::AdminCommand(_) => OperationKind::AdminCommand,
            Operation::CurrentOp(_) => OperationKind::CurrentOp,
            Operation::Collection { op, .. } => match op {
                CollectionOp::Find(_) => OperationKind::Find,
                CollectionOp::FindOne { .. } => OperationKind::FindOne,
                CollectionOp::Aggregate { .. } => OperationKind::Aggregate,
                CollectionOp::CountDocuments { .. } => OperationKind::CountDocuments,
                CollectionOp::EstimatedDocumentCount => OperationKind::EstimatedDocumentCount,
                CollectionOp::Distinct { .. } => OperationKind::Distinct,
                CollectionOp::Indexes => OperationKind::Indexes,
                CollectionOp::Stats => OperationKind::Stats,
                CollectionOp::InsertOne(_) => OperationKind::InsertOne,
                CollectionOp::InsertMany(_) => OperationKind::InsertMany,
                CollectionOp::UpdateOne { .. } => OperationKind::UpdateOne,
                CollectionOp::UpdateMany { .. } => OperationKind::UpdateMany,
                CollectionOp::ReplaceOne { .. } => OperationKind::ReplaceOne,
                CollectionOp::DeleteOne { .. } => OperationKind::DeleteOne,
                CollectionOp::DeleteMany { .. } => OperationKind::DeleteMany,
                CollectionOp::FindOneAndUpdate { .. } => OperationKind::FindOneAndUpdate,
                CollectionOp::FindOneAndDelete { .. } => OperationKind::FindOneAndDelete,
                CollectionOp::FindOneAndReplace { .. } => OperationKind::FindOneAndReplace,
                CollectionOp::CreateIndex { .. } => OperationKind::CreateIndex,
                CollectionOp::DropIndex(_) => OperationKind::DropIndex,
            },
        }
    }

    pub fn collection(&self) -> Option<&str> {
        match self {
            Operation::Collection { collection, .. } => Some(collection),
            _ => None,
        }
    }
}

/// Everything needed to run one query: the operation and how to shape its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub call: ParsedCall,
    pub operation: Operation,
    /// Cursor modifiers as written, including ones that had no effect.
    pub modifiers: Vec<ChainedModifier>,
    pub post_process: Option<PostProcessPath>,
    /// True when `find` fell back to the default result cap.
    pub default_limit_applied: bool,
}

impl Plan {
    /// Network-free description of what this plan will do.
    pub fn preview(&self) -> QueryPreview {
        let kind = self.operation.kind();
        QueryPreview {
            target_kind: self.call.target_kind,
            collection: self.operation.collection().map(str::to_string),
            method: kind,
            class: kind.class(),
            modifiers: self
                .modifiers
                .iter()
                .map(|m| PreviewModifier {
                    method: m.method,
                    value: m.value.clone().into_relaxed_extjson(),
                })
                .collect(),
            post_process: self.post_process.as_ref().map(|p| p.to_string()),
            default_limit_applied: self.default_limit_applied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewModifier {
    pub method: ModifierMethod,
    pub value: serde_json::Value,
}

/// What a query would do, without connecting anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPreview {
    pub target_kind: TargetKind,
    pub collection: Option<String>,
    pub method: OperationKind,
    pub class: OperationClass,
    pub modifiers: Vec<PreviewModifier>,
    pub post_process: Option<String>,
    pub default_limit_applied: bool,
}

/// Tokenize, parse and plan a query in one step.
pub fn plan_query(text: &str, default_find_limit: i64) -> QueryResult<Plan> {
    let call = tokenize(text)?;
    let plan = plan_call(call, default_find_limit)?;
    tracing::debug!(
        "Planned {} on {}",
        plan.operation.kind().as_str(),
        plan.operation.collection().unwrap_or("<database>")
    );
    Ok(plan)
}

/// Plan an already-tokenized call.
pub fn plan_call(call: ParsedCall, default_find_limit: i64) -> QueryResult<Plan> {
    let kind = OperationKind::from_call(call.target_kind, &call.method)?;
    let args = parse_shell_args(&call.args_raw)?;

    if call.target_kind.is_admin() {
        let path = parse_post_path(&call.remainder)?;
        let command = match (kind, args.first()) {
            // Shell idiom: `currentOp(true)` also reports idle operations.
            (OperationKind::CurrentOp, Some(Bson::Boolean(include_idle))) => {
                let mut filter = Document::new();
                if *include_idle {
                    filter.insert("idleSessions", true);
                }
                filter
            }
            _ => optional_doc(&args, 0, kind, "command")?,
        };
        let operation = match kind {
            OperationKind::RunCommand => Operation::RunCommand(command),
            OperationKind::AdminCommand => Operation::AdminCommand(command),
            _ => Operation::CurrentOp(command),
        };
        return Ok(Plan {
            call,
            operation,
            modifiers: Vec::new(),
            post_process: (!path.is_empty()).then_some(path),
            default_limit_applied: false,
        });
    }

    let modifiers = retained_modifiers(&scan_chain(&call.remainder)?);
    let collection = call.collection.clone().unwrap_or_default();
    let mut default_limit_applied = false;

    let op = match kind {
        OperationKind::Find => {
            let spec = build_find(&args, &modifiers, default_find_limit)?;
            default_limit_applied = !modifiers.iter().any(|m| m.method == ModifierMethod::Limit);
            CollectionOp::Find(spec)
        }
        OperationKind::FindOne => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let mut opts = Options::new(optional_doc(&args, 1, kind, "options")?, kind);
            let options = FindOneSpec {
                projection: opts.doc("projection")?,
                sort: opts.doc("sort")?,
                skip: opts.count("skip")?,
            };
            opts.finish()?;
            CollectionOp::FindOne { filter, options }
        }
        OperationKind::Aggregate => {
            let pipeline = doc_array(args.first(), kind, "pipeline")?.unwrap_or_default();
            let mut opts = Options::new(optional_doc(&args, 1, kind, "options")?, kind);
            let options = AggregateSpec {
                allow_disk_use: opts.bool("allowDiskUse")?,
                batch_size: opts.count_u32("batchSize")?,
                max_time_ms: opts.count("maxTimeMS")?,
                comment: opts.string("comment")?,
                hint: opts.index_ref("hint")?,
            };
            opts.finish()?;
            CollectionOp::Aggregate { pipeline, options }
        }
        OperationKind::CountDocuments => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let mut opts = Options::new(optional_doc(&args, 1, kind, "options")?, kind);
            let options = CountSpec {
                limit: opts.count("limit")?,
                skip: opts.count("skip")?,
                max_time_ms: opts.count("maxTimeMS")?,
                hint: opts.index_ref("hint")?,
            };
            opts.finish()?;
            CollectionOp::CountDocuments { filter, options }
        }
        OperationKind::EstimatedDocumentCount => CollectionOp::EstimatedDocumentCount,
        OperationKind::Distinct => {
            let field = match args.first() {
                Some(Bson::String(field)) if !field.is_empty() => field.clone(),
                _ => return Err(missing(kind, "a field name string")),
            };
            let filter = optional_doc(&args, 1, kind, "filter")?;
            CollectionOp::Distinct { field, filter }
        }
        OperationKind::Indexes => CollectionOp::Indexes,
        OperationKind::Stats => CollectionOp::Stats,
        OperationKind::InsertOne => {
            CollectionOp::InsertOne(required_doc(&args, 0, kind, "a document")?)
        }
        OperationKind::InsertMany => {
            let documents = doc_array(args.first(), kind, "documents")?
                .ok_or_else(|| missing(kind, "an array of documents"))?;
            CollectionOp::InsertMany(documents)
        }
        OperationKind::UpdateOne | OperationKind::UpdateMany => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let update = update_arg(args.get(1), kind)?;
            let options = write_spec(optional_doc(&args, 2, kind, "options")?, kind, true)?;
            if kind == OperationKind::UpdateOne {
                CollectionOp::UpdateOne {
                    filter,
                    update,
                    options,
                }
            } else {
                CollectionOp::UpdateMany {
                    filter,
                    update,
                    options,
                }
            }
        }
        OperationKind::ReplaceOne => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let replacement = required_doc(&args, 1, kind, "a replacement document")?;
            let options = write_spec(optional_doc(&args, 2, kind, "options")?, kind, true)?;
            CollectionOp::ReplaceOne {
                filter,
                replacement,
                options,
            }
        }
        OperationKind::DeleteOne | OperationKind::DeleteMany => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let options = write_spec(optional_doc(&args, 1, kind, "options")?, kind, false)?;
            if kind == OperationKind::DeleteOne {
                CollectionOp::DeleteOne { filter, options }
            } else {
                CollectionOp::DeleteMany { filter, options }
            }
        }
        OperationKind::FindOneAndUpdate => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let update = update_arg(args.get(1), kind)?;
            let options = find_and_modify_spec(optional_doc(&args, 2, kind, "options")?, kind)?;
            CollectionOp::FindOneAndUpdate {
                filter,
                update,
                options,
            }
        }
        OperationKind::FindOneAndDelete => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let options = find_and_modify_spec(optional_doc(&args, 1, kind, "options")?, kind)?;
            CollectionOp::FindOneAndDelete { filter, options }
        }
        OperationKind::FindOneAndReplace => {
            let filter = optional_doc(&args, 0, kind, "filter")?;
            let replacement = required_doc(&args, 1, kind, "a replacement document")?;
            let options = find_and_modify_spec(optional_doc(&args, 2, kind, "options")?, kind)?;
            CollectionOp::FindOneAndReplace {
                filter,
                replacement,
                options,
            }
        }
        OperationKind::CreateIndex => {
            let keys = required_doc(&args, 0, kind, "an index key document")?;
            if keys.is_empty() {
                return Err(missing(kind, "at least one index key"));
            }
            let mut opts = Options::new(optional_doc(&args, 1, kind, "options")?, kind);
            let options = IndexSpec {
                name: opts.string("name")?,
                unique: opts.bool("unique")?,
                sparse: opts.bool("sparse")?,
                expire_after_secs: opts.count("expireAfterSeconds")?,
                partial_filter: opts.doc("partialFilterExpression")?,
                background: opts.bool("background")?,
            };
            opts.finish()?;
            CollectionOp::CreateIndex { keys, options }
        }
        OperationKind::DropIndex => match args.first() {
            Some(Bson::String(name)) if !name.is_empty() => {
                CollectionOp::DropIndex(IndexRef::Name(name.clone()))
            }
            Some(Bson::Document(keys)) if !keys.is_empty() => {
                CollectionOp::DropIndex(IndexRef::Keys(keys.clone()))
            }
            _ => return Err(missing(kind, "an index name or key pattern")),
        },
        OperationKind::RunCommand | OperationKind::AdminCommand | OperationKind::CurrentOp => {
            return Err(QueryError::UnsupportedOperation(call.method.clone()));
        }
    };

    Ok(Plan {
        call,
        operation: Operation::Collection { collection, op },
        modifiers,
        post_process: None,
        default_limit_applied,
    })
}

/// Positional filter/projection plus chained modifiers, last one wins.
fn build_find(
    args: &[Bson],
    modifiers: &[ChainedModifier],
    default_find_limit: i64,
) -> QueryResult<FindSpec> {
    let kind = OperationKind::Find;
    let filter = optional_doc(args, 0, kind, "filter")?;
    let projection = optional_doc(args, 1, kind, "projection")?;

    let mut spec = FindSpec {
        filter,
        projection: (!projection.is_empty()).then_some(projection),
        sort: None,
        skip: None,
        limit: default_find_limit,
    };

    for modifier in modifiers {
        let name = modifier.method.as_str();
        match modifier.method {
            ModifierMethod::Limit => {
                spec.limit = as_i64(&modifier.value)
                    .ok_or_else(|| modifier_error(name, "an integer", &modifier.value))?;
            }
            ModifierMethod::Skip => {
                spec.skip = Some(
                    as_i64(&modifier.value)
                        .and_then(|n| u64::try_from(n).ok())
                        .ok_or_else(|| {
                            modifier_error(name, "a non-negative integer", &modifier.value)
                        })?,
                );
            }
            ModifierMethod::Sort => match &modifier.value {
                Bson::Document(doc) => spec.sort = Some(doc.clone()),
                other => return Err(modifier_error(name, "a sort document", other)),
            },
            ModifierMethod::Project => match &modifier.value {
                Bson::Document(doc) => spec.projection = Some(doc.clone()),
                other => return Err(modifier_error(name, "a projection document", other)),
            },
        }
    }

    Ok(spec)
}

fn modifier_error(name: &str, expected: &str, value: &Bson) -> QueryError {
    QueryError::argument(
        format!(".{name}({value})"),
        format!("{name}() expects {expected}"),
    )
}

fn missing(kind: OperationKind, what: &str) -> QueryError {
    QueryError::argument(kind.as_str(), format!("{} requires {what}", kind.as_str()))
}

fn optional_doc(args: &[Bson], index: usize, kind: OperationKind, name: &str) -> QueryResult<Document> {
    match args.get(index) {
        None | Some(Bson::Null) => Ok(Document::new()),
        Some(Bson::Document(doc)) => Ok(doc.clone()),
        Some(other) => Err(QueryError::argument(
            other.to_string(),
            format!("{} expects {name} to be an object", kind.as_str()),
        )),
    }
}

fn required_doc(args: &[Bson], index: usize, kind: OperationKind, what: &str) -> QueryResult<Document> {
    match args.get(index) {
        Some(Bson::Document(doc)) => Ok(doc.clone()),
        _ => Err(missing(kind, what)),
    }
}

fn doc_array(value: Option<&Bson>, kind: OperationKind, name: &str) -> QueryResult<Option<Vec<Document>>> {
    match value {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Array(items)) => items
            .iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(doc.clone()),
                other => Err(QueryError::argument(
                    other.to_string(),
                    format!("{} expects {name} to contain only objects", kind.as_str()),
                )),
            })
            .collect::<QueryResult<Vec<_>>>()
            .map(Some),
        Some(other) => Err(QueryError::argument(
            other.to_string(),
            format!("{} expects {name} to be an array", kind.as_str()),
        )),
    }
}

fn update_arg(value: Option<&Bson>, kind: OperationKind) -> QueryResult<UpdateModification> {
    match value {
        Some(Bson::Document(doc)) if !doc.is_empty() => Ok(UpdateModification::Document(doc.clone())),
        Some(Bson::Array(_)) => Ok(UpdateModification::Pipeline(
            doc_array(value, kind, "update pipeline")?.unwrap_or_default(),
        )),
        _ => Err(missing(kind, "an update document")),
    }
}

fn write_spec(options: Document, kind: OperationKind, allow_upsert: bool) -> QueryResult<WriteSpec> {
    let mut opts = Options::new(options, kind);
    let spec = WriteSpec {
        upsert: if allow_upsert { opts.bool("upsert")? } else { None },
        array_filters: if allow_upsert {
            opts.doc_list("arrayFilters")?
        } else {
            None
        },
        hint: opts.index_ref("hint")?,
    };
    opts.finish()?;
    Ok(spec)
}

fn find_and_modify_spec(options: Document, kind: OperationKind) -> QueryResult<FindAndModifySpec> {
    let mut opts = Options::new(options, kind);
    let modifies = kind != OperationKind::FindOneAndDelete;

    let projection = opts.doc("projection")?;
    let sort = opts.doc("sort")?;
    let (upsert, return_after, array_filters) = if modifies {
        let upsert = opts.bool("upsert")?;
        let return_new = opts.bool("returnNewDocument")?;
        let return_document = opts.string("returnDocument")?;
        let return_after = match return_document.as_deref() {
            Some("after") => true,
            Some("before") => false,
            Some(other) => {
                return Err(QueryError::argument(
                    other,
                    "returnDocument must be \"before\" or \"after\"",
                ))
            }
            None => return_new.unwrap_or(false),
        };
        let array_filters = if kind == OperationKind::FindOneAndUpdate {
            opts.doc_list("arrayFilters")?
        } else {
            None
        };
        (upsert, return_after, array_filters)
    } else {
        (None, false, None)
    };
    opts.finish()?;

    Ok(FindAndModifySpec {
        projection,
        sort,
        upsert,
        return_after,
        array_filters,
    })
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        _ => None,
    }
}

/// Reads typed entries out of an options object, rejecting anything left over.
struct Options {
    doc: Document,
    kind: OperationKind,
}

impl Options {
    fn new(doc: Document, kind: OperationKind) -> Self {
        Self { doc, kind }
    }

    fn invalid(&self, key: &str, value: &Bson, expected: &str) -> QueryError {
        QueryError::argument(
            format!("{key}: {value}"),
            format!("{} option '{key}' must be {expected}", self.kind.as_str()),
        )
    }

    fn bool(&mut self, key: &str) -> QueryResult<Option<bool>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Boolean(b)) => Ok(Some(b)),
            Some(other) => Err(self.invalid(key, &other, "a boolean")),
        }
    }

    fn count(&mut self, key: &str) -> QueryResult<Option<u64>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => as_i64(&value)
                .and_then(|n| u64::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(key, &value, "a non-negative integer")),
        }
    }

    fn count_u32(&mut self, key: &str) -> QueryResult<Option<u32>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => as_i64(&value)
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(key, &value, "a non-negative 32-bit integer")),
        }
    }

    fn string(&mut self, key: &str) -> QueryResult<Option<String>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.invalid(key, &other, "a string")),
        }
    }

    fn doc(&mut self, key: &str) -> QueryResult<Option<Document>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Document(d)) => Ok(Some(d)),
            Some(other) => Err(self.invalid(key, &other, "an object")),
        }
    }

    fn doc_list(&mut self, key: &str) -> QueryResult<Option<Vec<Document>>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => doc_array(Some(&value), self.kind, key),
        }
    }

    fn index_ref(&mut self, key: &str) -> QueryResult<Option<IndexRef>> {
        match self.doc.remove(key) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::String(name)) => Ok(Some(IndexRef::Name(name))),
            Some(Bson::Document(keys)) => Ok(Some(IndexRef::Keys(keys))),
            Some(other) => Err(self.invalid(key, &other, "an index name or key pattern")),
        }
    }

    fn finish(self) -> QueryResult<()> {
        match self.doc.keys().next() {
            None => Ok(()),
            Some(key) => Err(QueryError::argument(
                key.clone(),
                format!("unsupported option '{key}' for {}", self.kind.as_str()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn plan(text: &str) -> Plan {
        plan_query(text, DEFAULT_FIND_LIMIT).unwrap()
    }

    fn find_spec(plan: &Plan) -> &FindSpec {
        match &plan.operation {
            Operation::Collection {
                op: CollectionOp::Find(spec),
                ..
            } => spec,
            other => panic!("expected find, got {other:?}"),
        }
    }

    #[test]
    fn test_allow_list_mapping() {
        for kind in OperationKind::collection_methods() {
            let resolved =
                OperationKind::from_call(TargetKind::CollectionMethod, kind.as_str()).unwrap();
            assert_eq!(resolved, *kind);
        }
        assert_eq!(
            OperationKind::from_call(TargetKind::CurrentOp, "currentOp").unwrap(),
            OperationKind::CurrentOp
        );
        let err = OperationKind::from_call(TargetKind::CollectionMethod, "bogusMethod").unwrap_err();
        assert_eq!(err, QueryError::UnsupportedOperation("bogusMethod".to_string()));
        assert!(OperationKind::from_call(TargetKind::GetCollectionMethod, "runCommand").is_err());
        assert!(OperationKind::from_call(TargetKind::CollectionMethod, "drop").is_err());
    }

    #[test]
    fn test_classes() {
        assert_eq!(OperationKind::Find.class(), OperationClass::Read);
        assert_eq!(OperationKind::FindOneAndDelete.class(), OperationClass::Write);
        assert_eq!(OperationKind::DropIndex.class(), OperationClass::IndexAdmin);
        assert_eq!(OperationKind::CurrentOp.class(), OperationClass::ServerAdmin);
    }

    #[test]
    fn test_find_default_limit() {
        let p = plan(r#"db.users.find({status: "active"})"#);
        let spec = find_spec(&p);
        assert_eq!(spec.filter, doc! { "status": "active" });
        assert_eq!(spec.limit, DEFAULT_FIND_LIMIT);
        assert!(p.default_limit_applied);
        assert_eq!(p.operation.collection(), Some("users"));
    }

    #[test]
    fn test_find_modifiers() {
        let p = plan("db.users.find({}, {name: 1}).limit(2).skip(1).sort({_id: -1})");
        let spec = find_spec(&p);
        assert_eq!(spec.limit, 2);
        assert_eq!(spec.skip, Some(1));
        assert_eq!(spec.sort, Some(doc! { "_id": -1 }));
        assert_eq!(spec.projection, Some(doc! { "name": 1 }));
        assert!(!p.default_limit_applied);
    }

    #[test]
    fn test_repeated_modifier_last_wins() {
        let p = plan("db.users.find().limit(50).project({a: 1}).limit(5).project({b: 1})");
        let spec = find_spec(&p);
        assert_eq!(spec.limit, 5);
        assert_eq!(spec.projection, Some(doc! { "b": 1 }));
        assert_eq!(p.modifiers.len(), 4);
    }

    #[test]
    fn test_find_modifier_type_errors() {
        assert!(matches!(
            plan_query("db.users.find().limit('x')", 100),
            Err(QueryError::ArgumentParse { .. })
        ));
        assert!(matches!(
            plan_query("db.users.find().skip(-1)", 100),
            Err(QueryError::ArgumentParse { .. })
        ));
        assert!(matches!(
            plan_query("db.users.find().sort(1)", 100),
            Err(QueryError::ArgumentParse { .. })
        ));
    }

    #[test]
    fn test_unsupported_before_args() {
        let err = plan_query("db.orders.bogusMethod({this is not parsed", 100).unwrap_err();
        assert!(matches!(err, QueryError::UnbalancedDelimiters { .. }));

        let err = plan_query("db.orders.bogusMethod({x: =})", 100).unwrap_err();
        assert_eq!(err, QueryError::UnsupportedOperation("bogusMethod".to_string()));
    }

    #[test]
    fn test_admin_plans() {
        let p = plan("db.currentOp().inprog.length");
        assert_eq!(p.operation, Operation::CurrentOp(Document::new()));
        assert_eq!(p.post_process.as_ref().unwrap().to_string(), ".inprog.length");

        let p = plan("db.runCommand({ping: 1})");
        assert_eq!(p.operation, Operation::RunCommand(doc! { "ping": 1 }));
        assert!(p.post_process.is_none());

        let p = plan("db.adminCommand({listDatabases: 1}).databases[0].name");
        assert!(matches!(p.operation, Operation::AdminCommand(_)));

        assert!(matches!(
            plan_query("db.runCommand({ping: 1}).limit(1)", 100),
            Err(QueryError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_current_op_boolean_argument() {
        let p = plan("db.currentOp(true)");
        assert_eq!(p.operation, Operation::CurrentOp(doc! { "idleSessions": true }));

        let p = plan("db.currentOp(false).inprog.length");
        assert_eq!(p.operation, Operation::CurrentOp(Document::new()));

        assert!(matches!(
            plan_query("db.runCommand(true)", 100),
            Err(QueryError::ArgumentParse { .. })
        ));
        assert!(matches!(
            plan_query("db.currentOp('all')", 100),
            Err(QueryError::ArgumentParse { .. })
        ));
    }

    #[test]
    fn test_regex_literal_filters() {
        let p = plan("db.users.find({name: /don't/i})");
        let expected = bson::Regex {
            pattern: "don't".to_string(),
            options: "i".to_string(),
        };
        assert_eq!(find_spec(&p).filter, doc! { "name": Bson::RegularExpression(expected) });

        let p = plan(r"db.users.find({name: /^\(/}).limit(3)");
        match find_spec(&p).filter.get("name") {
            Some(Bson::RegularExpression(re)) => assert_eq!(re.pattern, r"^\("),
            other => panic!("expected regex, got {other:?}"),
        }
        assert_eq!(find_spec(&p).limit, 3);
    }

    #[test]
    fn test_wrapper_text_in_strings_preserved() {
        let p = plan(r#"db.notes.find({text: "NumberLong(5)", n: NumberLong(5)})"#);
        assert_eq!(find_spec(&p).filter, doc! { "text": "NumberLong(5)", "n": 5 });

        let p = plan(r#"db.notes.find({text: "see ObjectId('x')"})"#);
        assert_eq!(find_spec(&p).filter, doc! { "text": "see ObjectId('x')" });
    }

    #[test]
    fn test_write_plans() {
        let p = plan(r#"db.users.updateOne({_id: 1}, {$set: {a: 2}}, {upsert: true})"#);
        match p.operation {
            Operation::Collection {
                op: CollectionOp::UpdateOne { update, options, .. },
                ..
            } => {
                assert_eq!(update, UpdateModification::Document(doc! { "$set": { "a": 2 } }));
                assert_eq!(options.upsert, Some(true));
            }
            other => panic!("unexpected {other:?}"),
        }

        let p = plan("db.users.updateMany({}, [{$set: {b: 1}}])");
        assert!(matches!(
            p.operation,
            Operation::Collection {
                op: CollectionOp::UpdateMany {
                    update: UpdateModification::Pipeline(_),
                    ..
                },
                ..
            }
        ));

        let p = plan("db.users.insertMany([{a: 1}, {a: 2}])");
        assert!(matches!(
            p.operation,
            Operation::Collection { op: CollectionOp::InsertMany(ref docs), .. } if docs.len() == 2
        ));
    }

    #[test]
    fn test_missing_required_arguments() {
        for q in [
            "db.users.insertOne()",
            "db.users.insertMany({a: 1})",
            "db.users.insertMany([1, 2])",
            "db.users.updateOne({_id: 1})",
            "db.users.replaceOne({_id: 1})",
            "db.users.distinct()",
            "db.users.createIndex()",
            "db.users.createIndex({})",
            "db.users.dropIndex()",
            "db.users.findOneAndUpdate({_id: 1})",
        ] {
            let err = plan_query(q, 100).unwrap_err();
            assert!(matches!(err, QueryError::ArgumentParse { .. }), "{q}: {err:?}");
        }
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = plan_query("db.users.updateOne({}, {$set: {a: 1}}, {upsrt: true})", 100).unwrap_err();
        match err {
            QueryError::ArgumentParse { fragment, .. } => assert_eq!(fragment, "upsrt"),
            other => panic!("unexpected {other:?}"),
        }

        let err = plan_query("db.c.findOneAndDelete({}, {fields: {a: 1}})", 100).unwrap_err();
        match err {
            QueryError::ArgumentParse { fragment, .. } => assert_eq!(fragment, "fields"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_batch_size_out_of_range_rejected() {
        let p = plan("db.c.aggregate([], {batchSize: 500})");
        match p.operation {
            Operation::Collection {
                op: CollectionOp::Aggregate { options, .. },
                ..
            } => assert_eq!(options.batch_size, Some(500)),
            other => panic!("unexpected {other:?}"),
        }

        for query in [
            "db.c.aggregate([], {batchSize: 4294967296})",
            "db.c.aggregate([], {batchSize: -1})",
        ] {
            let err = plan_query(query, 100).unwrap_err();
            assert!(
                matches!(err, QueryError::ArgumentParse { ref reason, .. } if reason.contains("batchSize")),
                "{query}: {err:?}"
            );
        }
    }

    #[test]
    fn test_find_and_modify_return_document() {
        let p = plan("db.c.findOneAndUpdate({a: 1}, {$inc: {n: 1}}, {returnNewDocument: true})");
        match p.operation {
            Operation::Collection {
                op: CollectionOp::FindOneAndUpdate { options, .. },
                ..
            } => assert!(options.return_after),
            other => panic!("unexpected {other:?}"),
        }

        let p = plan(r#"db.c.findOneAndReplace({a: 1}, {a: 2}, {returnDocument: "before", upsert: true})"#);
        match p.operation {
            Operation::Collection {
                op: CollectionOp::FindOneAndReplace { options, .. },
                ..
            } => {
                assert!(!options.return_after);
                assert_eq!(options.upsert, Some(true));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(plan_query("db.c.findOneAndDelete({}, {upsert: true})", 100).is_err());
    }

    #[test]
    fn test_index_plans() {
        let p = plan(r#"db.users.createIndex({email: 1}, {unique: true, name: "email_1"})"#);
        match p.operation {
            Operation::Collection {
                op: CollectionOp::CreateIndex { keys, options },
                ..
            } => {
                assert_eq!(keys, doc! { "email": 1 });
                assert_eq!(options.unique, Some(true));
                assert_eq!(options.name.as_deref(), Some("email_1"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let p = plan(r#"db.users.dropIndex("email_1")"#);
        assert_eq!(p.operation.kind(), OperationKind::DropIndex);
    }

    #[test]
    fn test_preview() {
        let p = plan(r#"db.getCollection("orders").find({}).sort({at: -1}).pretty()"#);
        let preview = p.preview();
        assert_eq!(preview.method, OperationKind::Find);
        assert_eq!(preview.class, OperationClass::Read);
        assert_eq!(preview.collection.as_deref(), Some("orders"));
        assert_eq!(preview.modifiers.len(), 1);
        assert!(preview.default_limit_applied);

        let json = serde_json::to_value(&preview).unwrap();
        assert_eq!(json["method"], "find");
        assert_eq!(json["target_kind"], "get_collection_method");
    }
}
