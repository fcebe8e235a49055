#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsp_types::{DiagnosticSeverity, NumberOrString, Position, Range, TextDocumentContentChangeEvent};
use serde_json::json;
use xpkg_core::apis::Dependency;
use xpkg_core::gvk_from_type;
use xpkg_core::kinds::PackageType;
use xpkg_deps::{DepsError, Manager, ParsedPackage, ResolvedView, StaticManager};
use xpkg_snapshot::{Factory, SnapshotError};

const AWS: &str = "xpkg.upbound.io/upbound/provider-aws";

const META: &str = r#"apiVersion: meta.pkg.crossplane.io/v1
kind: Configuration
metadata:
  name: platform
spec:
  dependsOn:
    - provider: xpkg.upbound.io/upbound/provider-aws
      version: ">=v0.20.0"
    - provider: xpkg.upbound.io/upbound/provider-gcp
      version: ">=v0.1.0"
"#;

const XRD: &str = "\
apiVersion: apiextensions.crossplane.io/v1
kind: CompositeResourceDefinition
metadata:
  name: xnetworks.acme.io
spec:
  group: acme.io
  names:
    kind: XNetwork
    plural: xnetworks
  claimNames:
    kind: Network
    plural: networks
  versions:
    - name: v1alpha1
      served: true
      referenceable: true
      schema:
        openAPIV3Schema:
          type: object
          properties:
            spec:
              type: object
              properties:
                region:
                  type: string
                cidr:
                  type: string
";

const COMPOSITION: &str = "\
apiVersion: apiextensions.crossplane.io/v1
kind: Composition
metadata:
  name: xnetworks.aws.acme.io
spec:
  compositeTypeRef:
    apiVersion: acme.io/v1alpha1
    kind: XNetwork
  resources:
    - name: vpc
      base:
        apiVersion: ec2.aws.upbound.io/v1beta1
        kind: VPC
        spec:
          forProvider:
            cidrBlock: 10.0.0.0/16
      patches:
        - fromFieldPath: spec.region
          toFieldPath: spec.forProvider.region
        - fromFieldPath: spec.zone
          toFieldPath: spec.forProvider.cidrBlock
    - name: bucket
      base:
        apiVersion: s3.aws.upbound.io/v1beta1
        kind: Bucket
";

const EXAMPLE: &str = "\
apiVersion: acme.io/v1alpha1
kind: Network
metadata:
  name: demo
spec:
  region: us-east-1
  cidr: 42
";

fn vpc_crd() -> serde_json::Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": "vpcs.ec2.aws.upbound.io" },
        "spec": {
            "group": "ec2.aws.upbound.io",
            "scope": "Cluster",
            "names": { "kind": "VPC", "plural": "vpcs" },
            "versions": [{
                "name": "v1beta1", "served": true, "storage": true,
                "schema": { "openAPIV3Schema": {
                    "type": "object",
                    "properties": { "spec": {
                        "type": "object",
                        "required": ["forProvider"],
                        "properties": { "forProvider": {
                            "type": "object",
                            "required": ["region"],
                            "properties": {
                                "region": { "type": "string" },
                                "cidrBlock": { "type": "string" }
                            }
                        } }
                    } }
                } }
            }]
        }
    })
}

fn manager() -> Arc<dyn Manager> {
    Arc::new(StaticManager::new().with_package(ParsedPackage::new(
        AWS,
        PackageType::Provider,
        "v0.21.0",
        vec![vpc_crd()],
    )))
}

fn write(root: &Path, rel: &str, body: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    path
}

fn line_of(body: &str, needle: &str) -> u32 {
    body.lines().position(|l| l.contains(needle)).unwrap() as u32
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    meta: PathBuf,
    xrd: PathBuf,
    composition: PathBuf,
    example: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    Workspace {
        meta: write(&root, "crossplane.yaml", META),
        xrd: write(&root, "apis/network/definition.yaml", XRD),
        composition: write(&root, "apis/network/composition.yaml", COMPOSITION),
        example: write(&root, "examples/network.yaml", EXAMPLE),
        root,
        _dir: dir,
    }
}

#[tokio::test]
async fn snapshot_merges_local_and_external_validators() {
    let ws = workspace();
    let snap = Factory::new(manager()).new_snapshot(&ws.root).await.unwrap();

    assert!(snap.package(AWS).is_some());
    assert!(snap.package("xpkg.upbound.io/upbound/provider-gcp").is_none());
    assert!(snap.validator(&gvk_from_type("ec2.aws.upbound.io/v1beta1", "VPC")).is_some());
    assert!(snap.validator(&gvk_from_type("acme.io/v1alpha1", "Network")).is_some());
    assert!(snap.validator(&gvk_from_type("apiextensions.crossplane.io/v1", "Composition")).is_some());
    assert!(snap.validator(&gvk_from_type("apiextensions.crossplane.io/v1beta1", "Composition")).is_some());
    assert!(snap.validator(&gvk_from_type("s3.aws.upbound.io/v1beta1", "Bucket")).is_none());
}

#[tokio::test]
async fn meta_reports_unknown_dependency() {
    let ws = workspace();
    let snap = Factory::new(manager()).new_snapshot(&ws.root).await.unwrap();
    let diags = snap.validate(&ws.meta).unwrap();
    assert_eq!(diags.len(), 1, "{diags:?}");
    assert_eq!(diags[0].range.start.line, line_of(META, "provider: xpkg.upbound.io/upbound/provider-gcp"));
    assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));
    assert_eq!(diags[0].code, Some(NumberOrString::Number(500)));
}

#[tokio::test]
async fn composition_diagnostics() {
    let ws = workspace();
    let snap = Factory::new(manager()).new_snapshot(&ws.root).await.unwrap();
    let mut diags = snap.validate(&ws.composition).unwrap();
    diags.sort_by_key(|d| d.range.start.line);
    assert_eq!(diags.len(), 2, "{diags:?}");

    // patch source missing from the XRD schema
    assert_eq!(diags[0].range.start.line, line_of(COMPOSITION, "fromFieldPath: spec.zone"));
    assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));

    // no provider ships Bucket
    assert_eq!(diags[1].range.start.line, line_of(COMPOSITION, "apiVersion: s3.aws"));
    assert_eq!(diags[1].severity, Some(DiagnosticSeverity::WARNING));
    assert_eq!(diags[1].source.as_deref(), Some("xpkg"));
}

#[tokio::test]
async fn example_follows_edits_and_reparse() {
    let ws = workspace();
    let snap = Factory::new(manager()).new_snapshot(&ws.root).await.unwrap();
    let diags = snap.validate(&ws.example).unwrap();
    assert_eq!(diags.len(), 1, "{diags:?}");
    assert_eq!(diags[0].range.start.line, line_of(EXAMPLE, "cidr: 42"));
    assert_eq!(diags[0].code, Some(NumberOrString::Number(600)));

    let line = line_of(EXAMPLE, "cidr: 42");
    let change = TextDocumentContentChangeEvent {
        range: Some(Range::new(Position::new(line, 8), Position::new(line, 10))),
        range_length: None,
        text: "10.0.0.0/16".into(),
    };
    snap.update_content(&ws.example, &[change]).unwrap();
    // still stale until re-parsed
    assert_eq!(snap.validate(&ws.example).unwrap().len(), 1);
    snap.reparse_file(&ws.example).unwrap();
    assert!(snap.validate(&ws.example).unwrap().is_empty());
}

#[tokio::test]
async fn xrd_edits_refresh_local_validators() {
    let ws = workspace();
    let snap = Factory::new(manager()).new_snapshot(&ws.root).await.unwrap();
    assert_eq!(snap.validate(&ws.example).unwrap().len(), 1);

    let integer_cidr = XRD.replace("cidr:\n                  type: string", "cidr:\n                  type: integer");
    assert_ne!(integer_cidr, XRD);
    let change = TextDocumentContentChangeEvent { range: None, range_length: None, text: integer_cidr };
    snap.update_content(&ws.xrd, &[change]).unwrap();
    snap.reparse_file(&ws.xrd).unwrap();
    assert!(snap.validate(&ws.example).unwrap().is_empty());
}

#[tokio::test]
async fn validate_all_files_is_ordered() {
    let ws = workspace();
    let snap = Factory::new(manager()).new_snapshot(&ws.root).await.unwrap();
    let all = snap.validate_all_files().unwrap();
    let paths: Vec<_> = all.iter().map(|(p, _)| p.clone()).collect();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
    assert_eq!(all.len(), 4);
    assert_eq!(all.iter().map(|(_, d)| d.len()).sum::<usize>(), 4);
    assert!(matches!(
        snap.validate(&ws.root.join("missing.yaml")).unwrap_err(),
        SnapshotError::UnknownFile(_)
    ));
}

const MIXED: &str = "\
apiVersion: apiextensions.crossplane.io/v1
kind: Composition
metadata:
  name: mixed
spec:
  compositeTypeRef:
    apiVersion: acme.io/v1alpha1
    kind: XNetwork
  resources:
    - name: a
      base:
        apiVersion: acme.io/v1
        kind: One
    - base:
        apiVersion: acme.io/v1
        kind: Two
    - name: a
      base:
        apiVersion: acme.io/v1
        kind: Three
";

#[tokio::test]
async fn mixed_and_duplicate_template_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "composition.yaml", MIXED);
    let snap = Factory::new(manager()).new_snapshot(dir.path()).await.unwrap();
    let diags = snap.validate(&path).unwrap();

    let errors: Vec<_> = diags.iter().filter(|d| d.severity == Some(DiagnosticSeverity::ERROR)).collect();
    let warnings = diags.iter().filter(|d| d.severity == Some(DiagnosticSeverity::WARNING)).count();
    assert_eq!(errors.len(), 2, "{diags:?}");
    assert_eq!(warnings, 3, "one per template without a schema");

    let duplicate_line = MIXED.lines().enumerate().filter(|(_, l)| l.contains("- name: a")).last().unwrap().0 as u32;
    let mut lines: Vec<_> = errors.iter().map(|d| d.range.start.line).collect();
    lines.sort();
    assert_eq!(lines, [line_of(MIXED, "resources:"), duplicate_line]);
}

const INCOMPLETE_PATCH: &str = "\
apiVersion: apiextensions.crossplane.io/v1
kind: Composition
metadata:
  name: incomplete
spec:
  compositeTypeRef:
    apiVersion: acme.io/v1alpha1
    kind: XNetwork
  resources:
    - name: a
      base:
        apiVersion: acme.io/v1
        kind: One
      patches:
        - type: CombineFromComposite
          combine:
            variables:
              - field: spec.region
    - base:
        apiVersion: acme.io/v1
        kind: Two
";

#[tokio::test]
async fn incomplete_patch_keeps_naming_checks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "composition.yaml", INCOMPLETE_PATCH);
    let snap = Factory::new(manager()).new_snapshot(dir.path()).await.unwrap();
    let diags = snap.validate(&path).unwrap();

    let errors: Vec<_> = diags.iter().filter(|d| d.severity == Some(DiagnosticSeverity::ERROR)).collect();
    assert_eq!(errors.len(), 1, "{diags:?}");
    assert_eq!(errors[0].range.start.line, line_of(INCOMPLETE_PATCH, "resources:"));
    assert_eq!(diags.len() - errors.len(), 2, "one warning per template without a schema");
}

const LOCAL_VPC_CRD: &str = "\
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: vpcs.ec2.aws.upbound.io
spec:
  group: ec2.aws.upbound.io
  scope: Cluster
  names:
    kind: VPC
    plural: vpcs
  versions:
    - name: v1beta1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          type: object
          properties:
            spec:
              type: object
              properties:
                forProvider:
                  type: object
                  properties:
                    region:
                      type: integer
";

#[tokio::test]
async fn local_definitions_shadow_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "crossplane.yaml", META);
    write(dir.path(), "apis/vpc-crd.yaml", LOCAL_VPC_CRD);
    let vpc = write(
        dir.path(),
        "resources/vpc.yaml",
        "apiVersion: ec2.aws.upbound.io/v1beta1\nkind: VPC\nmetadata:\n  name: demo\nspec:\n  forProvider:\n    region: 5\n",
    );
    let snap = Factory::new(manager()).new_snapshot(dir.path()).await.unwrap();
    assert!(snap.package(AWS).is_some());
    assert!(snap.validate(&vpc).unwrap().is_empty());

    let validator = snap.validator(&gvk_from_type("ec2.aws.upbound.io/v1beta1", "VPC")).unwrap();
    let res = validator.validate(&json!({
        "apiVersion": "ec2.aws.upbound.io/v1beta1",
        "kind": "VPC",
        "spec": { "forProvider": { "region": "us-east-1" } }
    }));
    assert_eq!(res.errors.len(), 1, "{:?}", res.errors);
}

#[tokio::test]
async fn broken_dependency_objects_are_skipped() {
    let mut broken = vpc_crd();
    broken["metadata"]["name"] = json!("subnets.ec2.aws.upbound.io");
    broken["spec"]["names"] = json!({ "kind": "Subnet", "plural": "subnets" });
    broken["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["type"] = json!(5);
    let manager: Arc<dyn Manager> = Arc::new(StaticManager::new().with_package(ParsedPackage::new(
        AWS,
        PackageType::Provider,
        "v0.21.0",
        vec![broken, vpc_crd()],
    )));

    let ws = workspace();
    let snap = Factory::new(manager).new_snapshot(&ws.root).await.unwrap();
    assert!(snap.validator(&gvk_from_type("ec2.aws.upbound.io/v1beta1", "VPC")).is_some());
    assert!(snap.validator(&gvk_from_type("ec2.aws.upbound.io/v1beta1", "Subnet")).is_none());
}

const NETWORK_BASE: &str = "xpkg.upbound.io/acme/network-base";

#[tokio::test]
async fn composite_schema_comes_from_dependency_xrd() {
    let xrd: serde_json::Value = json!({
        "apiVersion": "apiextensions.crossplane.io/v1",
        "kind": "CompositeResourceDefinition",
        "metadata": { "name": "xnetworks.acme.io" },
        "spec": {
            "group": "acme.io",
            "names": { "kind": "XNetwork", "plural": "xnetworks" },
            "claimNames": { "kind": "Network", "plural": "networks" },
            "versions": [{
                "name": "v1alpha1", "served": true, "referenceable": true,
                "schema": { "openAPIV3Schema": {
                    "type": "object",
                    "properties": { "spec": {
                        "type": "object",
                        "properties": { "region": { "type": "string" } }
                    } }
                } }
            }]
        }
    });
    let manager: Arc<dyn Manager> = Arc::new(
        StaticManager::new()
            .with_package(ParsedPackage::new(AWS, PackageType::Provider, "v0.21.0", vec![vpc_crd()]))
            .with_package(ParsedPackage::new(NETWORK_BASE, PackageType::Configuration, "v1.0.0", vec![xrd])),
    );

    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "crossplane.yaml",
        &format!(
            "apiVersion: meta.pkg.crossplane.io/v1\nkind: Configuration\nmetadata:\n  name: platform\nspec:\n  dependsOn:\n    - provider: {AWS}\n      version: \">=v0.20.0\"\n    - configuration: {NETWORK_BASE}\n      version: \">=v1.0.0\"\n"
        ),
    );
    let path = write(dir.path(), "apis/composition.yaml", COMPOSITION);
    let snap = Factory::new(manager).new_snapshot(dir.path()).await.unwrap();
    assert!(snap.package(NETWORK_BASE).is_some());

    let mut diags = snap.validate(&path).unwrap();
    diags.sort_by_key(|d| d.range.start.line);
    assert_eq!(diags.len(), 2, "{diags:?}");
    assert_eq!(diags[0].range.start.line, line_of(COMPOSITION, "fromFieldPath: spec.zone"));
    assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));
    assert_eq!(diags[1].severity, Some(DiagnosticSeverity::WARNING));
}

struct FailingManager;

#[async_trait::async_trait]
impl Manager for FailingManager {
    async fn view(&self, _deps: &[Dependency]) -> Result<ResolvedView, DepsError> {
        Err(DepsError::Join("registry unreachable".into()))
    }

    async fn versions(&self, dep: &Dependency) -> Result<Vec<String>, DepsError> {
        Err(DepsError::NotFound(dep.package.clone()))
    }
}

#[tokio::test]
async fn manager_failure_aborts_snapshot_only_with_meta() {
    let ws = workspace();
    let factory = Factory::new(Arc::new(FailingManager));
    let err = factory.new_snapshot(&ws.root).await.err().unwrap();
    assert!(matches!(err, SnapshotError::Deps(_)), "{err}");

    let bare = tempfile::tempdir().unwrap();
    write(bare.path(), "xrd.yaml", XRD);
    assert!(factory.new_snapshot(bare.path()).await.is_ok());
}
