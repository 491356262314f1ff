//! CPU-side asset decoding: file bytes to [`DecodedAsset`] bundles.
//!
//! Everything in this module is pure CPU work and runs on the import
//! pipeline's background tasks. No device handle ever appears here; GPU
//! resource creation happens later, on the main thread, from the decoded
//! bundle (see [`crate::import`]).
//!
//! Texture and material references inside a bundle are *asset-local*
//! indices. Registration remaps them to the catalog's flat-array indices.

use std::io::{BufReader, Cursor};
use std::path::Path;

use anyhow::{Context, Result, bail};
use cgmath::InnerSpace;
use futures::future::join_all;

use crate::data_structures::instance::Instance;
use crate::data_structures::model::{DEFAULT_TEXTURE, Material, ModelVertex};
use crate::data_structures::texture::DecodedImage;
use crate::gpu::{AddressMode, FilterMode, SamplerDesc};

/// One decoded texture: image pixels plus the sampling parameters the
/// source asset asked for.
pub struct DecodedTexture {
    pub name: String,
    pub image: DecodedImage,
    pub sampler: SamplerDesc,
}

pub struct DecodedMesh {
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

/// One node of the asset's hierarchy. `mesh` and `material` are indices
/// into the bundle's own `meshes`/`materials`; parents precede children.
pub struct DecodedNode {
    pub name: String,
    pub parent: Option<usize>,
    pub local: Instance,
    pub mesh: Option<usize>,
    pub material: u32,
}

/// Everything one import produced on the CPU side, ready for main-thread
/// upload and registration.
pub struct DecodedAsset {
    pub name: String,
    pub source: String,
    pub nodes: Vec<DecodedNode>,
    pub meshes: Vec<DecodedMesh>,
    /// Texture slots are asset-local indices into `textures` (or
    /// [`DEFAULT_TEXTURE`]).
    pub materials: Vec<Material>,
    pub textures: Vec<DecodedTexture>,
}

async fn load_binary(path: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {path}"))
}

/// Decode an asset file by extension. Supported: `obj`, `gltf`, `glb`.
pub async fn decode_asset(path: &str) -> Result<DecodedAsset> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("obj") => decode_obj(path).await,
        Some("gltf") | Some("glb") => decode_gltf(path).await,
        other => bail!("unsupported asset format {:?} ({path})", other),
    }
}

fn asset_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

fn sibling_path(asset: &str, file: &str) -> String {
    Path::new(asset)
        .parent()
        .map(|dir| dir.join(file).to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

/**
 * Obj files don't come with tangents and bitangents so they have to be
 * calculated for normal maps to work correctly. Some gltf exporters skip
 * them too, so this runs for any mesh decoded without tangent data.
 */
fn compute_tangents(vertices: &mut [ModelVertex], indices: &[u32]) {
    let mut triangles_included = vec![0u32; vertices.len()];

    for c in indices.chunks(3) {
        let v0 = vertices[c[0] as usize];
        let v1 = vertices[c[1] as usize];
        let v2 = vertices[c[2] as usize];

        let pos0: cgmath::Vector3<f32> = v0.position.into();
        let pos1: cgmath::Vector3<f32> = v1.position.into();
        let pos2: cgmath::Vector3<f32> = v2.position.into();

        let uv0: cgmath::Vector2<f32> = v0.tex_coords.into();
        let uv1: cgmath::Vector2<f32> = v1.tex_coords.into();
        let uv2: cgmath::Vector2<f32> = v2.tex_coords.into();

        let delta_pos1 = pos1 - pos0;
        let delta_pos2 = pos2 - pos0;
        let delta_uv1 = uv1 - uv0;
        let delta_uv2 = uv2 - uv0;

        // Solving delta_pos = delta_uv.x * T + delta_uv.y * B for T and B.
        let denom = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        if denom.abs() < f32::EPSILON {
            continue;
        }
        let r = 1.0 / denom;
        let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
        // Flipped bitangent for right-handed normal maps in the wgpu
        // texture coordinate system.
        let bitangent = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * -r;

        for &i in c {
            let v = &mut vertices[i as usize];
            v.tangent = (tangent + cgmath::Vector3::from(v.tangent)).into();
            v.bitangent = (bitangent + cgmath::Vector3::from(v.bitangent)).into();
            triangles_included[i as usize] += 1;
        }
    }

    for (i, n) in triangles_included.into_iter().enumerate() {
        if n == 0 {
            continue;
        }
        let denom = 1.0 / n as f32;
        let v = &mut vertices[i];
        v.tangent = (cgmath::Vector3::from(v.tangent) * denom).into();
        v.bitangent = (cgmath::Vector3::from(v.bitangent) * denom).into();
    }
}

// ---- OBJ ----------------------------------------------------------------

async fn decode_obj(path: &str) -> Result<DecodedAsset> {
    let bytes = load_binary(path).await?;
    let mut reader = BufReader::new(Cursor::new(bytes));
    let source_dir = path.to_string();

    let (models, materials) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |mtl_path| {
            let full = sibling_path(&source_dir, &mtl_path.to_string_lossy());
            let data = std::fs::read(&full).map_err(|_| tobj::LoadError::OpenFileFailed)?;
            tobj::load_mtl_buf(&mut BufReader::new(Cursor::new(data)))
        },
    )
    .with_context(|| format!("parsing obj {path}"))?;
    let obj_materials = materials.unwrap_or_default();

    // Texture slots in an MTL are file paths; decode each referenced image
    // once and hand out asset-local indices.
    let mut texture_files: Vec<(String, bool)> = Vec::new();
    let local_index = |file: &str, srgb: bool, textures: &mut Vec<(String, bool)>| -> u32 {
        if let Some(i) = textures.iter().position(|(f, _)| f == file) {
            return i as u32;
        }
        textures.push((file.to_string(), srgb));
        (textures.len() - 1) as u32
    };

    let mut decoded_materials = Vec::with_capacity(obj_materials.len());
    for m in &obj_materials {
        let mut material = Material {
            name: m.name.clone(),
            ..Default::default()
        };
        if let Some(diffuse) = m.diffuse {
            material.base_color_factor = [diffuse[0], diffuse[1], diffuse[2], 1.0];
        }
        if let Some(shininess) = m.shininess {
            // Rough mapping of Phong shininess onto PBR roughness.
            material.roughness_factor = (1.0 - (shininess / 1000.0)).clamp(0.0, 1.0);
        }
        if let Some(file) = &m.diffuse_texture {
            material.base_color_texture = local_index(file, true, &mut texture_files);
        }
        if let Some(file) = &m.normal_texture {
            material.normal_texture = local_index(file, false, &mut texture_files);
        }
        decoded_materials.push(material);
    }
    if decoded_materials.is_empty() {
        decoded_materials.push(Material {
            name: format!("{} default", asset_name(path)),
            ..Default::default()
        });
    }

    let textures = decode_image_files(path, &texture_files).await;
    let mut materials = decoded_materials;
    remap_failed_textures(&mut materials, &textures);
    let textures: Vec<DecodedTexture> = textures.into_iter().flatten().collect();

    let mut meshes = Vec::new();
    let mut nodes = Vec::new();
    for (i, m) in models.iter().enumerate() {
        let mut vertices: Vec<ModelVertex> = (0..m.mesh.positions.len() / 3)
            .map(|v| ModelVertex {
                position: [
                    m.mesh.positions[v * 3],
                    m.mesh.positions[v * 3 + 1],
                    m.mesh.positions[v * 3 + 2],
                ],
                tex_coords: [
                    m.mesh.texcoords.get(v * 2).map_or(0.0, |f| *f),
                    1.0 - m.mesh.texcoords.get(v * 2 + 1).map_or(0.0, |f| *f),
                ],
                normal: [
                    m.mesh.normals.get(v * 3).map_or(0.0, |f| *f),
                    m.mesh.normals.get(v * 3 + 1).map_or(0.0, |f| *f),
                    m.mesh.normals.get(v * 3 + 2).map_or(0.0, |f| *f),
                ],
                tangent: [0.0; 3],
                bitangent: [0.0; 3],
            })
            .collect();
        compute_tangents(&mut vertices, &m.mesh.indices);

        let name = if m.name.is_empty() {
            format!("{} mesh {i}", asset_name(path))
        } else {
            m.name.clone()
        };
        nodes.push(DecodedNode {
            name: name.clone(),
            parent: None,
            local: Instance::default(),
            mesh: Some(meshes.len()),
            material: m.mesh.material_id.map_or(0, |id| id as u32),
        });
        meshes.push(DecodedMesh {
            name,
            vertices,
            indices: m.mesh.indices.clone(),
        });
    }

    Ok(DecodedAsset {
        name: asset_name(path),
        source: path.to_string(),
        nodes,
        meshes,
        materials,
        textures,
    })
}

/// Decode a list of image files concurrently. A file that cannot be read
/// or decoded yields `None`; its slot falls back to the default texture.
async fn decode_image_files(
    asset: &str,
    files: &[(String, bool)],
) -> Vec<Option<DecodedTexture>> {
    let futures = files.iter().map(|(file, srgb)| async move {
        let full = sibling_path(asset, file);
        let bytes = load_binary(&full).await.ok()?;
        let extension = Path::new(file).extension().and_then(|e| e.to_str());
        match DecodedImage::from_bytes(&bytes, extension, *srgb) {
            Ok(image) => Some(DecodedTexture {
                name: file.clone(),
                image,
                sampler: SamplerDesc::default(),
            }),
            Err(err) => {
                log::warn!("failed to decode {full}: {err}");
                None
            }
        }
    });
    join_all(futures).await
}

/// Collapse the decoded-texture list around failed entries: slots pointing
/// at failures become [`DEFAULT_TEXTURE`], surviving slots are renumbered
/// to the compacted list.
fn remap_failed_textures(materials: &mut [Material], textures: &[Option<DecodedTexture>]) {
    let remap: Vec<u32> = {
        let mut next = 0u32;
        textures
            .iter()
            .map(|t| {
                if t.is_some() {
                    let i = next;
                    next += 1;
                    i
                } else {
                    DEFAULT_TEXTURE
                }
            })
            .collect()
    };
    for material in materials {
        let material_name = material.name.clone();
        for slot in material.texture_slots_mut() {
            if *slot != DEFAULT_TEXTURE {
                let mapped = remap[*slot as usize];
                if mapped == DEFAULT_TEXTURE {
                    log::warn!(
                        "{}: texture slot fell back to the default texture",
                        material_name
                    );
                }
                *slot = mapped;
            }
        }
    }
}

// ---- glTF ---------------------------------------------------------------

async fn decode_gltf(path: &str) -> Result<DecodedAsset> {
    let bytes = load_binary(path).await?;
    let gltf = gltf::Gltf::from_reader(BufReader::new(Cursor::new(bytes)))
        .with_context(|| format!("parsing gltf {path}"))?;

    let mut buffer_data: Vec<Vec<u8>> = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                let blob = gltf
                    .blob
                    .as_deref()
                    .with_context(|| format!("{path}: binary chunk missing"))?;
                buffer_data.push(blob.into());
            }
            gltf::buffer::Source::Uri(uri) => {
                buffer_data.push(load_binary(&sibling_path(path, uri)).await?);
            }
        }
    }
    // Accessor and image-view reads index into these bytes unchecked, so a
    // buffer shorter than its declared byteLength is a decode failure.
    for (buffer, data) in gltf.buffers().zip(&buffer_data) {
        if data.len() < buffer.length() {
            bail!(
                "{path}: buffer {} holds {} bytes but declares {}",
                buffer.index(),
                data.len(),
                buffer.length()
            );
        }
    }

    let textures = decode_gltf_images(path, &gltf, &buffer_data).await;

    // Material texture slots carry the gltf *image* index here; failures
    // are remapped to the default texture below, like the OBJ path.
    let mut materials: Vec<Material> = Vec::new();
    for material in gltf.materials() {
        let pbr = material.pbr_metallic_roughness();
        let mut decoded = Material {
            name: material
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("material {}", materials.len())),
            base_color_factor: pbr.base_color_factor(),
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
            emissive_factor: material.emissive_factor(),
            ..Default::default()
        };
        if let Some(info) = pbr.base_color_texture() {
            decoded.base_color_texture = info.texture().source().index() as u32;
        }
        if let Some(info) = pbr.metallic_roughness_texture() {
            decoded.metallic_roughness_texture = info.texture().source().index() as u32;
        }
        if let Some(normal) = material.normal_texture() {
            decoded.normal_texture = normal.texture().source().index() as u32;
            decoded.normal_scale = normal.scale();
        }
        if let Some(occlusion) = material.occlusion_texture() {
            decoded.occlusion_texture = occlusion.texture().source().index() as u32;
            decoded.occlusion_strength = occlusion.strength();
        }
        if let Some(info) = material.emissive_texture() {
            decoded.emissive_texture = info.texture().source().index() as u32;
        }
        materials.push(decoded);
    }
    if materials.is_empty() {
        materials.push(Material {
            name: format!("{} default", asset_name(path)),
            ..Default::default()
        });
    }
    remap_failed_textures(&mut materials, &textures);
    let textures: Vec<DecodedTexture> = textures.into_iter().flatten().collect();

    // One decoded mesh per primitive; (mesh, primitive) -> local index.
    let mut meshes: Vec<DecodedMesh> = Vec::new();
    let mut primitive_index: Vec<Vec<(usize, u32)>> = Vec::new();
    for mesh in gltf.meshes() {
        let mesh_name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh {}", mesh.index()));
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            let reader =
                primitive.reader(|buffer| buffer_data.get(buffer.index()).map(Vec::as_slice));
            let Some(positions) = reader.read_positions() else {
                log::warn!("{mesh_name}: primitive without positions skipped");
                continue;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let tex_coords: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|tc| tc.into_f32().collect())
                .unwrap_or_default();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|n| n.collect())
                .unwrap_or_default();
            let tangents: Vec<[f32; 4]> = reader
                .read_tangents()
                .map(|t| t.collect())
                .unwrap_or_default();

            let mut vertices: Vec<ModelVertex> = (0..positions.len())
                .map(|i| {
                    let tangent = tangents.get(i).copied().unwrap_or([0.0; 4]);
                    let normal = normals.get(i).copied().unwrap_or([0.0; 3]);
                    let bitangent = if tangents.is_empty() {
                        [0.0; 3]
                    } else {
                        // glTF stores handedness in w.
                        (cgmath::Vector3::from(normal)
                            .cross(cgmath::Vector3::new(tangent[0], tangent[1], tangent[2]))
                            * tangent[3])
                            .into()
                    };
                    ModelVertex {
                        position: positions[i],
                        tex_coords: tex_coords.get(i).copied().unwrap_or([0.0; 2]),
                        normal,
                        tangent: [tangent[0], tangent[1], tangent[2]],
                        bitangent,
                    }
                })
                .collect();
            let indices: Vec<u32> = reader
                .read_indices()
                .map(|i| i.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());
            if tangents.is_empty() {
                compute_tangents(&mut vertices, &indices);
            }

            let material = primitive
                .material()
                .index()
                .map_or(0, |i| i as u32)
                .min(materials.len() as u32 - 1);
            primitives.push((meshes.len(), material));
            meshes.push(DecodedMesh {
                name: format!("{mesh_name} primitive {}", primitive.index()),
                vertices,
                indices,
            });
        }
        primitive_index.push(primitives);
    }

    // Flatten the node hierarchy depth-first so parents precede children.
    let mut nodes: Vec<DecodedNode> = Vec::new();
    for scene in gltf.scenes() {
        for node in scene.nodes() {
            flatten_gltf_node(&node, None, &primitive_index, &mut nodes);
        }
    }

    Ok(DecodedAsset {
        name: asset_name(path),
        source: path.to_string(),
        nodes,
        meshes,
        materials,
        textures,
    })
}

fn flatten_gltf_node(
    node: &gltf::Node,
    parent: Option<usize>,
    primitive_index: &[Vec<(usize, u32)>],
    out: &mut Vec<DecodedNode>,
) {
    let (translation, rotation, scale) = node.transform().decomposed();
    let local = Instance {
        position: translation.into(),
        rotation: cgmath::Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2])
            .normalize(),
        scale: scale.into(),
    };
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node {}", node.index()));

    let primitives = node
        .mesh()
        .map(|m| primitive_index[m.index()].as_slice())
        .unwrap_or(&[]);
    let (first_mesh, first_material) = primitives
        .first()
        .map(|&(mesh, material)| (Some(mesh), material))
        .unwrap_or((None, 0));

    let index = out.len();
    out.push(DecodedNode {
        name: name.clone(),
        parent,
        local,
        mesh: first_mesh,
        material: first_material,
    });
    // Extra primitives become identity-transform children.
    for (i, &(mesh, material)) in primitives.iter().enumerate().skip(1) {
        out.push(DecodedNode {
            name: format!("{name} primitive {i}"),
            parent: Some(index),
            local: Instance::default(),
            mesh: Some(mesh),
            material,
        });
    }
    for child in node.children() {
        flatten_gltf_node(&child, Some(index), primitive_index, out);
    }
}

async fn decode_gltf_images(
    path: &str,
    gltf: &gltf::Gltf,
    buffer_data: &[Vec<u8>],
) -> Vec<Option<DecodedTexture>> {
    // Color-space per image: sRGB when any material uses it for base color
    // or emissive, linear otherwise.
    let mut srgb = vec![false; gltf.images().len()];
    for material in gltf.materials() {
        let pbr = material.pbr_metallic_roughness();
        if let Some(info) = pbr.base_color_texture() {
            srgb[info.texture().source().index()] = true;
        }
        if let Some(info) = material.emissive_texture() {
            srgb[info.texture().source().index()] = true;
        }
    }
    // Sampler per image: taken from the first texture referencing it.
    let mut samplers = vec![SamplerDesc::default(); gltf.images().len()];
    for texture in gltf.textures() {
        samplers[texture.source().index()] = map_gltf_sampler(&texture.sampler());
    }

    let futures = gltf.images().map(|image| {
        let srgb = srgb[image.index()];
        let sampler = samplers[image.index()];
        async move {
            let name = image
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} image {}", asset_name(path), image.index()));
            let decoded = match image.source() {
                gltf::image::Source::View { view, mime_type } => buffer_data
                    .get(view.buffer().index())
                    .and_then(|data| data.get(view.offset()..view.offset() + view.length()))
                    .with_context(|| format!("image bytes outside buffer {}", view.buffer().index()))
                    .and_then(|bytes| {
                        DecodedImage::from_bytes(bytes, mime_type.split('/').next_back(), srgb)
                    }),
                gltf::image::Source::Uri { uri, mime_type } => {
                    let full = sibling_path(path, uri);
                    match load_binary(&full).await {
                        Ok(bytes) => DecodedImage::from_bytes(
                            &bytes,
                            mime_type.and_then(|mt| mt.split('/').next_back()),
                            srgb,
                        ),
                        Err(err) => Err(err),
                    }
                }
            };
            match decoded {
                Ok(image) => Some(DecodedTexture {
                    name,
                    image,
                    sampler,
                }),
                Err(err) => {
                    log::warn!("failed to decode image '{name}': {err}");
                    None
                }
            }
        }
    });
    join_all(futures).await
}

fn map_gltf_sampler(sampler: &gltf::texture::Sampler) -> SamplerDesc {
    use gltf::texture::{MagFilter, MinFilter, WrappingMode};
    SamplerDesc {
        mag_filter: match sampler.mag_filter() {
            Some(MagFilter::Nearest) => FilterMode::Nearest,
            _ => FilterMode::Linear,
        },
        min_filter: match sampler.min_filter() {
            Some(MinFilter::Nearest)
            | Some(MinFilter::NearestMipmapNearest)
            | Some(MinFilter::NearestMipmapLinear) => FilterMode::Nearest,
            _ => FilterMode::Linear,
        },
        address_mode: match sampler.wrap_s() {
            WrappingMode::ClampToEdge => AddressMode::ClampToEdge,
            _ => AddressMode::Repeat,
        },
    }
}
