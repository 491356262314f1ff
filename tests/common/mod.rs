#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use mirador::catalog::Catalog;
use mirador::data_structures::model::{MeshResource, ModelVertex};
use mirador::gpu::RenderDevice;
use mirador::ident::{Ident, IdentAllocator, IdentKind};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fresh fixture directory under the system temp dir, emptied per test.
pub(crate) fn fixture_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mirador-tests-{test}"));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create fixture dir");
    dir
}

/// Write a minimal textured quad as OBJ + MTL + PNG and return the path
/// of the .obj file.
pub(crate) fn write_obj_fixture(test: &str) -> String {
    let dir = fixture_dir(test);

    image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 40, 40, 255]))
        .save(dir.join("checker.png"))
        .expect("write fixture texture");

    fs::write(
        dir.join("quad.mtl"),
        "newmtl checker\nKd 0.8 0.2 0.2\nmap_Kd checker.png\n",
    )
    .expect("write fixture mtl");

    fs::write(
        dir.join("quad.obj"),
        concat!(
            "mtllib quad.mtl\n",
            "o quad\n",
            "v 0.0 0.0 0.0\n",
            "v 1.0 0.0 0.0\n",
            "v 1.0 1.0 0.0\n",
            "v 0.0 1.0 0.0\n",
            "vt 0.0 0.0\n",
            "vt 1.0 0.0\n",
            "vt 1.0 1.0\n",
            "vt 0.0 1.0\n",
            "vn 0.0 0.0 1.0\n",
            "usemtl checker\n",
            "f 1/1/1 2/2/1 3/3/1\n",
            "f 1/1/1 3/3/1 4/4/1\n",
        ),
    )
    .expect("write fixture obj");

    dir.join("quad.obj").to_string_lossy().into_owned()
}

/// Write a glTF whose external buffer declares far more bytes than its
/// .bin actually holds, with an image view pointing past the real data.
/// Returns the path of the .gltf file.
pub(crate) fn write_truncated_gltf_fixture(test: &str) -> String {
    let dir = fixture_dir(test);

    fs::write(dir.join("a.bin"), [0u8; 10]).expect("write fixture bin");
    fs::write(
        dir.join("a.gltf"),
        concat!(
            "{\n",
            "  \"asset\": { \"version\": \"2.0\" },\n",
            "  \"buffers\": [ { \"uri\": \"a.bin\", \"byteLength\": 1000 } ],\n",
            "  \"bufferViews\": [ { \"buffer\": 0, \"byteOffset\": 500, \"byteLength\": 100 } ],\n",
            "  \"images\": [ { \"bufferView\": 0, \"mimeType\": \"image/png\" } ]\n",
            "}\n",
        ),
    )
    .expect("write fixture gltf");

    dir.join("a.gltf").to_string_lossy().into_owned()
}

pub(crate) fn triangle_vertices() -> Vec<ModelVertex> {
    let v = |position: [f32; 3], tex_coords: [f32; 2]| ModelVertex {
        position,
        tex_coords,
        normal: [0.0, 0.0, 1.0],
        tangent: [1.0, 0.0, 0.0],
        bitangent: [0.0, 1.0, 0.0],
    };
    vec![
        v([0.0, 0.0, 0.0], [0.0, 0.0]),
        v([1.0, 0.0, 0.0], [1.0, 0.0]),
        v([0.0, 1.0, 0.0], [0.0, 1.0]),
    ]
}

/// Register a single-triangle mesh and return its identifier.
pub(crate) fn make_mesh(
    device: &dyn RenderDevice,
    catalog: &mut Catalog,
    ids: &Arc<IdentAllocator>,
    frames_in_flight: usize,
) -> Ident {
    let id = ids.allocate(IdentKind::Mesh);
    let mesh = MeshResource::new(
        device,
        "triangle",
        &triangle_vertices(),
        &[0, 1, 2],
        frames_in_flight,
    );
    catalog.insert_mesh(id, mesh);
    id
}
