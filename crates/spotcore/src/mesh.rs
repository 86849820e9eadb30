//! 3D model export.
//!
//! Inputs are brought to glTF JSON (directly for `.gltf`, through external
//! commands otherwise), normalized in place, and compressed into
//! `<folder>/<filename>.glb` by the configured compressor. Intermediates live
//! in a temporary directory under the run's tmp folder.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use serde_json::{json, Map, Value};

use crate::config::MeshConfig;
use crate::error::{Result, SpotError};

const LIGHTS_EXTENSION: &str = "KHR_lights_punctual";

pub struct MeshPipeline {
    config: MeshConfig,
    tmp_dir: PathBuf,
}

impl MeshPipeline {
    pub fn new(config: MeshConfig, tmp_dir: PathBuf) -> Self {
        Self { config, tmp_dir }
    }

    /// Export `input` to `<out_folder>/<out_filename>.glb`.
    pub fn export(&self, input: &Path, out_folder: &Path, out_filename: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.tmp_dir).map_err(|e| SpotError::io(&self.tmp_dir, e))?;
        let work = tempfile::Builder::new()
            .prefix("mesh-")
            .tempdir_in(&self.tmp_dir)
            .map_err(|e| SpotError::io(&self.tmp_dir, e))?;

        let mut doc = self.load_gltf(input, work.path())?;

        normalize_orientation(&mut doc, self.config.rotate_x_degrees);
        normalize_materials(&mut doc);
        if self.config.lights {
            inject_lights(&mut doc);
        }

        let normalized = work.path().join("normalized.gltf");
        let text = serde_json::to_vec_pretty(&doc).map_err(|e| SpotError::writer("mesh", e))?;
        fs::write(&normalized, text).map_err(|e| SpotError::io(&normalized, e))?;

        let output = out_folder.join(format!("{out_filename}.glb"));
        run_template(&self.config.compressor, &normalized, &output)?;

        info!("{} -> {}", input.display(), output.display());
        Ok(output)
    }

    /// glTF JSON for `input`, with external resources available inside `work`.
    fn load_gltf(&self, input: &Path, work: &Path) -> Result<Value> {
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let gltf = match extension.as_str() {
            "gltf" => {
                let doc = read_json(input)?;
                let base = input.parent().unwrap_or_else(|| Path::new("."));
                copy_resources(&doc, base, work)?;
                return Ok(doc);
            }
            "glb" => {
                let out = work.join("model.gltf");
                run_template(&self.config.unpacker, input, &out)?;
                out
            }
            _ => {
                let out = work.join("model.gltf");
                run_template(&self.config.converter, input, &out)?;
                out
            }
        };

        read_json(&gltf)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read(path).map_err(|e| SpotError::io(path, e))?;
    serde_json::from_slice(&text).map_err(|e| {
        SpotError::writer("mesh", anyhow::anyhow!("{} is not glTF JSON: {e}", path.display()))
    })
}

/// Relative buffer and image URIs of `doc`.
fn relative_uris(doc: &Value) -> Vec<String> {
    ["buffers", "images"]
        .iter()
        .filter_map(|key| doc.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(|item| item.get("uri").and_then(Value::as_str))
        .filter(|uri| !uri.starts_with("data:") && !uri.contains("://"))
        .map(str::to_string)
        .collect()
}

fn copy_resources(doc: &Value, base: &Path, work: &Path) -> Result<()> {
    for uri in relative_uris(doc) {
        let from = base.join(&uri);
        let to = work.join(&uri);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| SpotError::io(parent, e))?;
        }
        fs::copy(&from, &to).map_err(|e| SpotError::io(&from, e))?;
    }
    Ok(())
}

/// Run a `{input}`/`{output}` command template.
fn run_template(template: &str, input: &Path, output: &Path) -> Result<()> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let mut parts = template
        .split_whitespace()
        .map(|token| token.replace("{input}", &input).replace("{output}", &output));

    let program = parts
        .next()
        .ok_or_else(|| SpotError::Config(format!("empty mesh command template: {template:?}")))?;
    let args: Vec<String> = parts.collect();

    debug!("running {program} {}", args.join(" "));
    let status = Command::new(&program)
        .args(&args)
        .status()
        .map_err(|e| SpotError::io(&program, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(SpotError::ExternalTool {
            tool: program,
            status: status.code(),
        })
    }
}

fn object_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    let slot = value
        .as_object_mut()?
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
}

fn array_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Vec<Value>> {
    let slot = value
        .as_object_mut()?
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
}

/// Index of the default scene, creating one if the document has none.
fn default_scene(doc: &mut Value) -> Option<usize> {
    let index = doc.get("scene").and_then(Value::as_u64).unwrap_or(0) as usize;
    let scenes = array_mut(doc, "scenes")?;
    if scenes.is_empty() {
        scenes.push(json!({ "nodes": [] }));
        doc["scene"] = json!(0);
        return Some(0);
    }
    Some(index.min(scenes.len() - 1))
}

/// Wrap every scene's root nodes in a node rotated `degrees` about X.
pub fn normalize_orientation(doc: &mut Value, degrees: f64) {
    if degrees == 0.0 || !doc.is_object() {
        return;
    }

    let half = degrees.to_radians() / 2.0;
    let rotation = json!([half.sin(), 0.0, 0.0, half.cos()]);

    let scene_count = doc.get("scenes").and_then(Value::as_array).map_or(0, Vec::len);
    for s in 0..scene_count {
        let Some(roots) = doc["scenes"]
            .get(s)
            .filter(|scene| scene.is_object())
            .map(|scene| scene.get("nodes").cloned().unwrap_or_else(|| json!([])))
        else {
            continue;
        };

        let Some(nodes) = array_mut(doc, "nodes") else {
            return;
        };
        nodes.push(json!({
            "name": "Orientation",
            "rotation": rotation,
            "children": roots,
        }));
        let wrapper = nodes.len() - 1;

        if let Some(scene) = doc["scenes"].get_mut(s) {
            scene["nodes"] = json!([wrapper]);
        }
    }
}

/// Double-sided, non-metallic materials; roughness defaults to 1.
pub fn normalize_materials(doc: &mut Value) {
    let Some(materials) = doc.get_mut("materials").and_then(Value::as_array_mut) else {
        return;
    };

    for material in materials.iter_mut().filter(|m| m.is_object()) {
        material["doubleSided"] = json!(true);
        if let Some(pbr) = object_mut(material, "pbrMetallicRoughness") {
            pbr.insert("metallicFactor".into(), json!(0.0));
            pbr.entry("roughnessFactor").or_insert(json!(1.0));
        }
    }
}

/// Add a directional and a point light, with a node carrying the first one
/// in the default scene.
pub fn inject_lights(doc: &mut Value) {
    let Some(extensions) = object_mut(doc, "extensions") else {
        return;
    };
    extensions.insert(
        LIGHTS_EXTENSION.into(),
        json!({
            "lights": [
                {
                    "type": "directional",
                    "intensity": 15.0,
                    "color": [1.0, 1.0, 1.0],
                    "name": "DirectionalLight"
                },
                {
                    "type": "point",
                    "intensity": 50.0,
                    "color": [0.8, 0.8, 1.0],
                    "name": "PointLight"
                }
            ]
        }),
    );

    if let Some(used) = array_mut(doc, "extensionsUsed") {
        if !used.iter().any(|v| v == LIGHTS_EXTENSION) {
            used.push(json!(LIGHTS_EXTENSION));
        }
    }

    let Some(scene) = default_scene(doc) else {
        return;
    };
    let Some(nodes) = array_mut(doc, "nodes") else {
        return;
    };
    nodes.push(json!({
        "name": "Light",
        "extensions": { LIGHTS_EXTENSION: { "light": 0 } }
    }));
    let light_node = nodes.len() - 1;

    if let Some(scene_nodes) = doc["scenes"]
        .get_mut(scene)
        .and_then(|scene| array_mut(scene, "nodes"))
    {
        scene_nodes.push(json!(light_node));
    }
}
