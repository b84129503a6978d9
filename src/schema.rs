use serde::{Deserialize, Serialize};
use std::fmt;

/// The three tables tracked by the dashboard. Each shares the editing,
/// history and persistence machinery but carries its own field set.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum RowVariant {
    ContractorList,
    BillTracker,
    Epbg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Amount,
    Choice(&'static [&'static str]),
    /// Display-only value recomputed from other fields when serialized.
    Derived,
    /// One of the name/base64/type triple owned by an attachment slot.
    Attachment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentSlot {
    pub slot: &'static str,
    pub name_field: &'static str,
    pub data_field: &'static str,
    pub type_field: &'static str,
}

/// Where a page keeps its local copy when the remote API is unavailable.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// Lives only as long as the owning process (the browser tab in the dashboard).
    Session,
    /// Survives restarts.
    Persistent,
}

#[derive(Debug)]
pub struct VariantSchema {
    pub variant: RowVariant,
    pub title: &'static str,
    pub storage_key: &'static str,
    pub endpoint: &'static str,
    pub fields: &'static [FieldSpec],
    pub attachments: &'static [AttachmentSlot],
    /// Extra incoming names that map onto a field, beyond the case/underscore folding.
    pub aliases: &'static [(&'static str, &'static str)],
    pub contractor_field: &'static str,
    pub start_field: Option<&'static str>,
    pub expiry_field: Option<&'static str>,
    pub value_field: Option<&'static str>,
    pub description_field: Option<&'static str>,
    pub efile_field: Option<&'static str>,
}

const GST_RATES: &[&str] = &["", "0%", "5%", "12%", "18%", "28%"];
const BILL_FREQUENCIES: &[&str] = &["", "0.00", "0.25", "0.50", "0.75", "1.00"];

const FILE_SLOT: AttachmentSlot = AttachmentSlot {
    slot: "file",
    name_field: "fileName",
    data_field: "fileBase64",
    type_field: "fileType",
};

const BG_NO_SLOT: AttachmentSlot = AttachmentSlot {
    slot: "bgNoAttachment",
    name_field: "bgNoAttachmentName",
    data_field: "bgNoAttachmentBase64",
    type_field: "bgNoAttachmentType",
};

const fn field(name: &'static str, label: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, label, kind }
}

static CONTRACTOR_LIST: VariantSchema = VariantSchema {
    variant: RowVariant::ContractorList,
    title: "Contractor List",
    storage_key: "contractorListData",
    endpoint: "/contractor-list",
    fields: &[
        field("efile", "E-File", FieldKind::Text),
        field("contractor", "Contractor", FieldKind::Text),
        field("description", "Description", FieldKind::Text),
        field("value", "Value", FieldKind::Amount),
        field("gst", "GST", FieldKind::Choice(GST_RATES)),
        field("startDate", "Start Date", FieldKind::Date),
        field("endDate", "End Date", FieldKind::Date),
        field("duration", "Duration", FieldKind::Derived),
        field("fileName", "Attachment", FieldKind::Attachment),
        field("fileBase64", "Attachment Data", FieldKind::Attachment),
        field("fileType", "Attachment Type", FieldKind::Attachment),
    ],
    attachments: &[FILE_SLOT],
    aliases: &[("name", "contractor"), ("workorder", "efile")],
    contractor_field: "contractor",
    start_field: Some("startDate"),
    expiry_field: Some("endDate"),
    value_field: Some("value"),
    description_field: Some("description"),
    efile_field: Some("efile"),
};

static BILL_TRACKER: VariantSchema = VariantSchema {
    variant: RowVariant::BillTracker,
    title: "Bill Tracker",
    storage_key: "billTrackerData",
    endpoint: "/bill-tracker",
    fields: &[
        field("efile", "E-File", FieldKind::Text),
        field("contractor", "Contractor", FieldKind::Text),
        field("approvedDate", "Approved Date", FieldKind::Date),
        field("approvedAmount", "Approved Amount", FieldKind::Amount),
        field("billFrequency", "Bill Frequency", FieldKind::Choice(BILL_FREQUENCIES)),
        field("billDate", "Bill Date", FieldKind::Date),
        field("billDueDate", "Bill Due Date", FieldKind::Date),
        field("billPaidDate", "Bill Paid Date", FieldKind::Date),
        field("paidAmount", "Paid Amount", FieldKind::Amount),
        field("fileName", "Attachment", FieldKind::Attachment),
        field("fileBase64", "Attachment Data", FieldKind::Attachment),
        field("fileType", "Attachment Type", FieldKind::Attachment),
    ],
    attachments: &[FILE_SLOT],
    aliases: &[("efileno", "efile"), ("attachment", "fileName")],
    contractor_field: "contractor",
    start_field: Some("approvedDate"),
    expiry_field: Some("billDueDate"),
    value_field: Some("approvedAmount"),
    description_field: None,
    efile_field: Some("efile"),
};

static EPBG: VariantSchema = VariantSchema {
    variant: RowVariant::Epbg,
    title: "EPBG Tracker",
    storage_key: "epbgData",
    endpoint: "/epbg",
    fields: &[
        field("contractor", "Contractor", FieldKind::Text),
        field("poNo", "PO No", FieldKind::Text),
        field("bgNo", "BG No", FieldKind::Text),
        field("bgDate", "BG Date", FieldKind::Date),
        field("bgAmount", "BG Amount", FieldKind::Amount),
        field("bgValidity", "BG Validity", FieldKind::Date),
        field("gemBid", "GeM Bid No", FieldKind::Text),
        field("refEfile", "Ref E-File No", FieldKind::Text),
        field("fileName", "Attachment", FieldKind::Attachment),
        field("fileBase64", "Attachment Data", FieldKind::Attachment),
        field("fileType", "Attachment Type", FieldKind::Attachment),
        field("bgNoAttachmentName", "BG No Attachment", FieldKind::Attachment),
        field("bgNoAttachmentBase64", "BG No Attachment Data", FieldKind::Attachment),
        field("bgNoAttachmentType", "BG No Attachment Type", FieldKind::Attachment),
    ],
    attachments: &[FILE_SLOT, BG_NO_SLOT],
    aliases: &[("gembidno", "gemBid"), ("refefileno", "refEfile")],
    contractor_field: "contractor",
    start_field: Some("bgDate"),
    expiry_field: Some("bgValidity"),
    value_field: Some("bgAmount"),
    description_field: None,
    efile_field: Some("refEfile"),
};

impl RowVariant {
    pub const ALL: [RowVariant; 3] = [
        RowVariant::ContractorList,
        RowVariant::BillTracker,
        RowVariant::Epbg,
    ];

    pub fn schema(self) -> &'static VariantSchema {
        match self {
            RowVariant::ContractorList => &CONTRACTOR_LIST,
            RowVariant::BillTracker => &BILL_TRACKER,
            RowVariant::Epbg => &EPBG,
        }
    }

    /// URL-style name, as used in REST paths and CLI arguments.
    pub fn slug(self) -> &'static str {
        match self {
            RowVariant::ContractorList => "contractor-list",
            RowVariant::BillTracker => "bill-tracker",
            RowVariant::Epbg => "epbg",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        let folded = fold_name(slug);
        RowVariant::ALL
            .into_iter()
            .find(|v| fold_name(v.slug()) == folded || fold_name(v.schema().storage_key) == folded)
    }
}

impl fmt::Display for RowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl VariantSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// Fields that appear as columns in exports (everything except raw attachment data).
    pub fn columns(&self) -> impl Iterator<Item = &FieldSpec> + '_ {
        let hidden: Vec<&str> = self
            .attachments
            .iter()
            .flat_map(|a| [a.data_field, a.type_field])
            .collect();
        self.fields.iter().filter(move |f| !hidden.contains(&f.name))
    }

    pub fn date_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Date)
            .map(|f| f.name)
    }

    pub fn attachment(&self, slot: &str) -> Option<&AttachmentSlot> {
        self.attachments.iter().find(|a| a.slot == slot)
    }

    /// Resolve an incoming field name (wire name, database column, export label)
    /// to the canonical field name. `sno` is reported separately since the grid owns it.
    pub fn resolve(&self, incoming: &str) -> Option<&'static str> {
        let folded = fold_name(incoming);
        if folded.is_empty() {
            return None;
        }
        if let Some(spec) = self
            .fields
            .iter()
            .find(|f| fold_name(f.name) == folded || fold_name(f.label) == folded)
        {
            return Some(spec.name);
        }
        self.aliases
            .iter()
            .find(|(alias, _)| fold_name(alias) == folded)
            .map(|(_, target)| *target)
    }
}

/// Lowercase and drop separators so `end_date`, `END DATE` and `endDate` compare equal.
pub fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn is_sequence_field(name: &str) -> bool {
    matches!(fold_name(name).as_str(), "sno" | "serialno" | "srno")
}
