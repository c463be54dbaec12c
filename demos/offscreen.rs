//! Offscreen Rendering Example
//!
//! Renders a small scene on the GPU without a window and writes the final
//! frame to `offscreen.ppm`:
//! - a triangle and a rectangle sharing one material (one multi-draw)
//! - a grid of instanced quads with an emissive texture feeding the bloom
//!
//! Run with `RUST_LOG=debug` to follow the frame stages.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use anyhow::Context;
use glam::{Mat4, Vec3};

use ember::prelude::*;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const FRAMES: u32 = 3;

fn quad(label: &str, size: f32, material: Handle<Material>) -> Mesh {
    let n = [0.0, 0.0, 1.0];
    Mesh::new(
        label,
        vec![
            Vertex::new([-size, -size, 0.0], n, [0.0, 1.0]),
            Vertex::new([size, -size, 0.0], n, [1.0, 1.0]),
            Vertex::new([size, size, 0.0], n, [1.0, 0.0]),
            Vertex::new([-size, size, 0.0], n, [0.0, 0.0]),
        ],
        vec![0, 1, 2, 2, 3, 0],
        material,
    )
}

fn triangle(material: Handle<Material>) -> Mesh {
    let n = [0.0, 0.0, 1.0];
    Mesh::new(
        "Triangle",
        vec![
            Vertex::new([-0.5, -0.5, 0.0], n, [0.0, 1.0]),
            Vertex::new([0.5, -0.5, 0.0], n, [1.0, 1.0]),
            Vertex::new([0.0, 0.5, 0.0], n, [0.5, 0.0]),
        ],
        vec![0, 1, 2],
        material,
    )
}

/// 2x2 RGBA8 texture of one color.
fn solid(rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat(4)
}

fn write_ppm(path: &str, rgba: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "P6\n{width} {height}\n255")?;
    for pixel in rgba.chunks_exact(4) {
        out.write_all(&pixel[..3])?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = RendererSettings {
        shader_dir: RendererSettings::builtin_shader_dir(),
        clear_color: [0.02, 0.02, 0.04, 1.0],
        ..RendererSettings::default()
    };
    let device = WgpuDevice::headless(WIDTH, HEIGHT, &settings)
        .context("no GPU adapter supports bindless textures")?;
    let mut renderer = Renderer::new(device, settings)?;

    let forward = renderer.load_program("forward")?;

    let white = renderer.add_texture(
        TextureParams::new("White"),
        TextureFormat::Rgba8UnormSrgb,
        2,
        2,
        Some(solid([255, 255, 255, 255]).as_slice()),
    );
    let glow = renderer.add_texture(
        TextureParams::new("Glow").with_filter(FilterMode::Nearest),
        TextureFormat::Rgba8Unorm,
        2,
        2,
        Some(solid([255, 140, 40, 255]).as_slice()),
    );

    let plain = renderer.add_material(
        Material::new("Plain")
            .with_program(RenderPass::Forward, forward)
            .with_texture(TextureSlot::Diffuse, white),
    );
    let emissive = renderer.add_material(
        Material::new("Emissive")
            .with_program(RenderPass::Forward, forward)
            .with_texture(TextureSlot::Diffuse, white)
            .with_texture(TextureSlot::Emissive, glow),
    );

    renderer.register_object(
        &Object::new("Triangle")
            .with_mesh(Arc::new(triangle(plain)))
            .with_transform(Mat4::from_translation(Vec3::new(-1.2, 0.0, 0.0))),
    );
    renderer.register_object(
        &Object::new("Rectangle")
            .with_mesh(Arc::new(quad("Rectangle", 0.5, plain)))
            .with_transform(Mat4::from_translation(Vec3::new(1.2, 0.0, 0.0))),
    );

    let tile = Arc::new(quad("Tile", 0.08, emissive));
    for y in 0..4 {
        for x in 0..8 {
            let offset = Vec3::new(x as f32 * 0.25 - 0.875, y as f32 * 0.25 - 1.2, 0.2);
            renderer.register_object(
                &Object::new(format!("Tile {x},{y}"))
                    .with_mesh(Arc::clone(&tile))
                    .with_transform(Mat4::from_translation(offset)),
            );
        }
    }

    let aspect = WIDTH as f32 / HEIGHT as f32;
    let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y);
    renderer.set_view_projection(projection * view);

    for _ in 0..FRAMES {
        let stats = renderer.render();
        log::info!(
            "frame {}: {} objects, {} batches, {} draw calls, {} triangles in {:?}",
            stats.frame,
            stats.objects,
            stats.indirect_batches,
            stats.draw_calls,
            stats.triangles(),
            stats.cpu_time
        );
    }

    let pixels = renderer
        .device_mut()
        .capture_default_target()
        .context("default target is not readable")?;
    write_ppm("offscreen.ppm", &pixels, WIDTH, HEIGHT)?;
    println!("Wrote offscreen.ppm ({WIDTH}x{HEIGHT})");

    let device = renderer.shutdown();
    println!("Presented {} frames", device.frames_presented());
    Ok(())
}
