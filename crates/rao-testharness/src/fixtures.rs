//! ---
//! rao_section: "08-test-harness"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile fixtures for pipeline tests."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Programmatic exchange profile fixtures.
//!
//! Documents are rendered with the production [`RdfWriter`], so a fixture
//! exercises the same reader path as a delivered file.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use rao_common::{CaseId, COMPACT_TIMESTAMP};
use rao_model::{build_case, BuildOptions, BuiltCase, ConversionTable};
use rao_profiles::rdf::NC_NS;
use rao_profiles::{
    parse_profile, ProfileDocument, ProfileMeta, ProfileType, RdfValue, RdfWriter, RecordSet,
    ValidityWindow,
};

use crate::parameters::parameter_config;

/// Target timestamp of the standard case.
pub fn target() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).single().unwrap_or_default()
}

/// `20250602T1030Z_1D`
pub fn case_id() -> CaseId {
    CaseId::new(target(), "1D").expect("fixture case id is valid")
}

/// The hour containing `target()`.
pub fn hour_window() -> ValidityWindow {
    window_around(target())
}

pub fn window_around(at: DateTime<Utc>) -> ValidityWindow {
    let start = at - Duration::minutes(30);
    ValidityWindow::new(start, start + Duration::hours(1)).expect("one hour window")
}

/// A window that ended an hour before `target()`.
pub fn expired_window() -> ValidityWindow {
    window_around(target() - Duration::hours(2))
}

/// One RDF object.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureObject {
    pub class: String,
    pub id: String,
    pub properties: Vec<(String, RdfValue)>,
}

impl FixtureObject {
    pub fn new(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            properties: Vec::new(),
        }
    }

    pub fn literal(mut self, property: &str, value: impl ToString) -> Self {
        self.properties
            .push((property.to_owned(), RdfValue::Literal(value.to_string())));
        self
    }

    pub fn reference(mut self, property: &str, target: &str) -> Self {
        self.properties
            .push((property.to_owned(), RdfValue::Resource(target.to_owned())));
        self
    }

    /// Enumeration member such as `RemedialActionKind.curative`.
    pub fn enumeration(mut self, property: &str, member: &str) -> Self {
        self.properties.push((
            property.to_owned(),
            RdfValue::Resource(format!("{NC_NS}{member}")),
        ));
        self
    }

    pub fn named(self, name: &str) -> Self {
        self.literal("cim:IdentifiedObject.name", name)
    }

    /// Drop every property whose name ends with `suffix`.
    pub fn without(mut self, suffix: &str) -> Self {
        self.properties.retain(|(name, _)| !name.ends_with(suffix));
        self
    }
}

/// One exchange document under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureDocument {
    pub profile_type: ProfileType,
    pub publisher: String,
    /// Window declared by the transport metadata.
    pub window: ValidityWindow,
    /// Window written into the header.
    pub header_window: ValidityWindow,
    pub keyword: String,
    pub header: bool,
    pub objects: Vec<FixtureObject>,
}

impl FixtureDocument {
    pub fn new(profile_type: ProfileType) -> Self {
        Self {
            profile_type,
            publisher: "TSOA".to_owned(),
            window: hour_window(),
            header_window: hour_window(),
            keyword: profile_type.keyword().to_owned(),
            header: true,
            objects: Vec::new(),
        }
    }

    pub fn publisher(mut self, publisher: &str) -> Self {
        self.publisher = publisher.to_owned();
        self
    }

    /// Set both the declared and the header window.
    pub fn window(mut self, window: ValidityWindow) -> Self {
        self.window = window;
        self.header_window = window;
        self
    }

    pub fn header_window(mut self, window: ValidityWindow) -> Self {
        self.header_window = window;
        self
    }

    pub fn keyword(mut self, keyword: &str) -> Self {
        self.keyword = keyword.to_owned();
        self
    }

    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    pub fn with(mut self, object: FixtureObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn push(&mut self, object: FixtureObject) {
        self.objects.push(object);
    }

    pub fn remove(&mut self, id: &str) -> Option<FixtureObject> {
        let position = self.objects.iter().position(|object| object.id == id)?;
        Some(self.objects.remove(position))
    }

    pub fn object_mut(&mut self, id: &str) -> Option<&mut FixtureObject> {
        self.objects.iter_mut().find(|object| object.id == id)
    }

    /// `<KEYWORD>_<PUBLISHER>_<START>_<END>.xml`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.xml",
            self.profile_type.keyword(),
            self.publisher,
            self.window.start.format(COMPACT_TIMESTAMP),
            self.window.end.format(COMPACT_TIMESTAMP)
        )
    }

    pub fn render(&self) -> rao_profiles::Result<Vec<u8>> {
        let mut writer = RdfWriter::new(self.file_name())?;
        if self.header {
            let stamp = |at: DateTime<Utc>| at.to_rfc3339_opts(SecondsFormat::Secs, true);
            writer.header(
                &format!("hdr-{}-{}", self.keyword, self.publisher),
                &[
                    ("md:Model.keyword", RdfValue::Literal(self.keyword.clone())),
                    ("dcat:startDate", RdfValue::Literal(stamp(self.header_window.start))),
                    ("dcat:endDate", RdfValue::Literal(stamp(self.header_window.end))),
                    ("md:Model.scenarioTime", RdfValue::Literal(stamp(target()))),
                    ("dcterms:created", RdfValue::Literal("2025-06-01T12:00:00Z".to_owned())),
                    ("md:Model.version", RdfValue::Literal("1".to_owned())),
                    ("dcterms:publisher", RdfValue::Literal(self.publisher.clone())),
                ],
            )?;
        }
        for object in &self.objects {
            let properties: Vec<(&str, RdfValue)> = object
                .properties
                .iter()
                .map(|(name, value)| (name.as_str(), value.clone()))
                .collect();
            writer.object(&object.class, &object.id, &properties)?;
        }
        writer.finish()
    }

    pub fn meta(&self) -> ProfileMeta {
        ProfileMeta {
            id: self.file_name(),
            source: self.publisher.clone(),
            profile_type: self.profile_type,
            validity: self.window,
            version: Some("1".to_owned()),
        }
    }

    /// Render into a document; panics if the in-memory writer fails.
    pub fn document(&self) -> ProfileDocument {
        let payload = self.render().expect("fixture document renders");
        ProfileDocument::new(self.meta(), payload)
    }
}

/// The five documents of one study case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseFixture {
    pub contingencies: FixtureDocument,
    pub assessed_elements: FixtureDocument,
    pub remedial_actions: FixtureDocument,
    pub flow_limits: FixtureDocument,
    pub glsk: FixtureDocument,
}

impl CaseFixture {
    /// Two lines, a transformer, a breaker, a shunt and two generators;
    /// three contingencies (one not studied); two assessed elements;
    /// a preventive topology action and a curative shunt action.
    pub fn standard() -> Self {
        Self {
            contingencies: contingency_profile(),
            assessed_elements: assessed_element_profile(),
            remedial_actions: remedial_action_profile(),
            flow_limits: flow_limit_profile(),
            glsk: glsk_profile(),
        }
    }

    /// Link `ae-line-1` to a remedial action nobody defines.
    pub fn with_undefined_remedial_action(mut self, remedial_action: &str) -> Self {
        self.assessed_elements.push(
            FixtureObject::new("nc:AssessedElementWithRemedialAction", "aewra-undefined")
                .reference(
                    "nc:AssessedElementWithRemedialAction.AssessedElement",
                    "ae-line-1",
                )
                .reference(
                    "nc:AssessedElementWithRemedialAction.RemedialAction",
                    remedial_action,
                ),
        );
        self
    }

    pub fn fixtures(&self) -> [&FixtureDocument; 5] {
        [
            &self.contingencies,
            &self.assessed_elements,
            &self.remedial_actions,
            &self.flow_limits,
            &self.glsk,
        ]
    }

    pub fn documents(&self) -> Vec<ProfileDocument> {
        self.fixtures().iter().map(|fixture| fixture.document()).collect()
    }

    /// Parse every document for `target()` and merge the records; panics on parse errors.
    pub fn records(&self) -> RecordSet {
        let mut records = RecordSet::default();
        for document in self.documents() {
            let parsed = parse_profile(&document, target()).expect("fixture document parses");
            records.extend(parsed.records);
        }
        records
    }

    /// Build the case with the standard parameters; panics on build errors.
    pub fn built(&self) -> BuiltCase {
        let records = self.records();
        let table = ConversionTable::from_records(&records);
        build_case(
            &case_id(),
            &records,
            &table,
            parameter_config().applied(),
            &BuildOptions::default(),
        )
        .expect("standard fixture builds")
    }

    pub fn internal_case(&self) -> Arc<rao_model::InternalCase> {
        self.built().case
    }

    /// Write the documents under `<root>/<case-key>/` using the delivery file names.
    pub fn write_to(&self, root: &Path, case: &CaseId) -> std::io::Result<()> {
        let dir = root.join(case.key());
        fs::create_dir_all(&dir)?;
        for fixture in self.fixtures() {
            let payload = fixture
                .render()
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
            fs::write(dir.join(fixture.file_name()), payload)?;
        }
        Ok(())
    }
}

pub fn contingency_profile() -> FixtureDocument {
    FixtureDocument::new(ProfileType::Contingency)
        .with(
            FixtureObject::new("nc:OrdinaryContingency", "co-line-2")
                .named("N-1 Line 2")
                .literal("nc:Contingency.normalMustStudy", "true"),
        )
        .with(
            FixtureObject::new("cim:ContingencyEquipment", "ce-line-2")
                .reference("cim:ContingencyElement.Contingency", "co-line-2")
                .reference("cim:ContingencyEquipment.Equipment", "line-2"),
        )
        .with(FixtureObject::new("nc:OrdinaryContingency", "co-gen-1").named("N-1 Generator 1"))
        .with(
            FixtureObject::new("cim:ContingencyEquipment", "ce-gen-1")
                .reference("cim:ContingencyElement.Contingency", "co-gen-1")
                .reference("cim:ContingencyEquipment.Equipment", "gen-1"),
        )
        .with(
            FixtureObject::new("nc:ExceptionalContingency", "co-busbar")
                .named("Busbar fault")
                .literal("nc:Contingency.normalMustStudy", "false"),
        )
}

pub fn assessed_element_profile() -> FixtureDocument {
    FixtureDocument::new(ProfileType::AssessedElement)
        .with(
            FixtureObject::new("nc:AssessedElement", "ae-line-1")
                .named("Line 1")
                .reference("nc:AssessedElement.AssessedSystemOperator", "tso-a")
                .reference("nc:AssessedElement.ConductingEquipment", "line-1")
                .literal("nc:AssessedElement.inBaseCase", "true")
                .reference("nc:AssessedElement.SecuredForRegion", "region-core"),
        )
        .with(
            FixtureObject::new("nc:AssessedElement", "ae-tr-1")
                .named("Transformer 1")
                .reference("nc:AssessedElement.ConductingEquipment", "tr-1")
                .reference("nc:AssessedElement.ScannedForRegion", "region-core"),
        )
        .with(
            FixtureObject::new("nc:AssessedElementWithContingency", "aewc-line-1")
                .reference("nc:AssessedElementWithContingency.AssessedElement", "ae-line-1")
                .reference("nc:AssessedElementWithContingency.Contingency", "co-line-2")
                .literal("nc:AssessedElementWithContingency.normalEnabled", "true"),
        )
        .with(
            FixtureObject::new("nc:AssessedElementWithRemedialAction", "aewra-line-1")
                .reference("nc:AssessedElementWithRemedialAction.AssessedElement", "ae-line-1")
                .reference("nc:AssessedElementWithRemedialAction.RemedialAction", "ra-open-brk"),
        )
}

pub fn remedial_action_profile() -> FixtureDocument {
    FixtureDocument::new(ProfileType::RemedialAction)
        .with(
            FixtureObject::new("nc:GridStateAlterationRemedialAction", "ra-open-brk")
                .named("Open breaker 1")
                .reference("nc:RemedialAction.RemedialActionSystemOperator", "tso-a")
                .enumeration("nc:RemedialAction.kind", "RemedialActionKind.preventive"),
        )
        .with(
            FixtureObject::new("nc:TopologyAction", "ta-brk-1")
                .reference(
                    "nc:GridStateAlteration.GridStateAlterationRemedialAction",
                    "ra-open-brk",
                )
                .reference("nc:TopologyAction.Equipment", "brk-1"),
        )
        .with(
            FixtureObject::new("nc:StaticPropertyRange", "spr-brk-1")
                .reference("nc:RangeConstraint.GridStateAlteration", "ta-brk-1")
                .literal("nc:RangeConstraint.normalValue", "1"),
        )
        .with(
            FixtureObject::new("nc:GridStateAlterationRemedialAction", "ra-shunt")
                .named("Shunt to 2 sections")
                .enumeration("nc:RemedialAction.kind", "RemedialActionKind.curative"),
        )
        .with(
            FixtureObject::new("nc:ShuntCompensatorModification", "scm-shunt-1")
                .reference(
                    "nc:GridStateAlteration.GridStateAlterationRemedialAction",
                    "ra-shunt",
                )
                .reference("nc:ShuntCompensatorModification.ShuntCompensator", "shunt-1"),
        )
        .with(
            FixtureObject::new("nc:StaticPropertyRange", "spr-shunt-1")
                .reference("nc:RangeConstraint.GridStateAlteration", "scm-shunt-1")
                .literal("nc:RangeConstraint.normalValue", "2"),
        )
        .with(
            FixtureObject::new("nc:ContingencyWithRemedialAction", "cwra-shunt")
                .reference("nc:ContingencyWithRemedialAction.Contingency", "co-line-2")
                .reference("nc:ContingencyWithRemedialAction.RemedialAction", "ra-shunt"),
        )
}

/// Equipment, topology, state voltages and operational limits.
///
/// `line-1` sits between 400 kV and 410 kV nodes (405 kV); `tr-1` between
/// 400 kV and 220 kV (400 kV, the higher side).
pub fn flow_limit_profile() -> FixtureDocument {
    let mut document = FixtureDocument::new(ProfileType::FlowLimit)
        .with(FixtureObject::new("cim:ACLineSegment", "line-1").named("Line 1"))
        .with(FixtureObject::new("cim:ACLineSegment", "line-2").named("Line 2"))
        .with(FixtureObject::new("cim:PowerTransformer", "tr-1").named("Transformer 1"))
        .with(FixtureObject::new("cim:Breaker", "brk-1").named("Breaker 1"))
        .with(FixtureObject::new("cim:LinearShuntCompensator", "shunt-1").named("Shunt 1"))
        .with(FixtureObject::new("cim:SynchronousMachine", "gen-1").named("Generator 1"))
        .with(FixtureObject::new("cim:SynchronousMachine", "gen-2").named("Generator 2"));

    for (id, equipment, node) in [
        ("t-line-1-a", "line-1", "n-400"),
        ("t-line-1-b", "line-1", "n-410"),
        ("t-tr-1-a", "tr-1", "n-400"),
        ("t-tr-1-b", "tr-1", "n-220"),
    ] {
        document.push(
            FixtureObject::new("cim:Terminal", id)
                .reference("cim:Terminal.ConductingEquipment", equipment)
                .reference("cim:Terminal.TopologicalNode", node),
        );
    }
    for (id, node, kv) in [("sv-400", "n-400", 400.0), ("sv-410", "n-410", 410.0), ("sv-220", "n-220", 220.0)] {
        document.push(
            FixtureObject::new("cim:SvVoltage", id)
                .reference("cim:SvVoltage.TopologicalNode", node)
                .literal("cim:SvVoltage.v", kv),
        );
    }

    document
        .with(
            FixtureObject::new("cim:OperationalLimitType", "lt-patl")
                .enumeration("cim:OperationalLimitType.limitType", "LimitTypeKind.patl"),
        )
        .with(
            FixtureObject::new("cim:OperationalLimitType", "lt-tatl")
                .enumeration("cim:OperationalLimitType.limitType", "LimitTypeKind.tatl"),
        )
        .with(
            FixtureObject::new("cim:OperationalLimitSet", "ls-line-1")
                .reference("cim:OperationalLimitSet.Terminal", "t-line-1-a"),
        )
        .with(
            FixtureObject::new("cim:CurrentLimit", "cl-line-1-patl")
                .reference("cim:OperationalLimit.OperationalLimitSet", "ls-line-1")
                .reference("cim:OperationalLimit.OperationalLimitType", "lt-patl")
                .literal("cim:CurrentLimit.value", 1000),
        )
        .with(
            FixtureObject::new("cim:CurrentLimit", "cl-line-1-tatl")
                .reference("cim:OperationalLimit.OperationalLimitSet", "ls-line-1")
                .reference("cim:OperationalLimit.OperationalLimitType", "lt-tatl")
                .literal("cim:CurrentLimit.value", 1200),
        )
        .with(
            FixtureObject::new("cim:OperationalLimitSet", "ls-tr-1")
                .reference("cim:OperationalLimitSet.Equipment", "tr-1"),
        )
        .with(
            FixtureObject::new("cim:ActivePowerLimit", "apl-tr-1-patl")
                .reference("cim:OperationalLimit.OperationalLimitSet", "ls-tr-1")
                .reference("cim:OperationalLimit.OperationalLimitType", "lt-patl")
                .literal("cim:ActivePowerLimit.value", 500),
        )
}

pub fn glsk_profile() -> FixtureDocument {
    FixtureDocument::new(ProfileType::Glsk)
        .with(
            FixtureObject::new("nc:PowerShiftKey", "psk-gen-1")
                .literal("nc:PowerShiftKey.area", "10YAREA-A")
                .reference("nc:PowerShiftKey.Equipment", "gen-1")
                .literal("nc:PowerShiftKey.factor", 0.6),
        )
        .with(
            FixtureObject::new("nc:PowerShiftKey", "psk-gen-2")
                .literal("nc:PowerShiftKey.area", "10YAREA-A")
                .reference("nc:PowerShiftKey.Equipment", "gen-2")
                .literal("nc:PowerShiftKey.factor", 0.4),
        )
}
