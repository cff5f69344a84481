//! Attach to two cube channels and relay traffic between them.
//!
//! Each "cube" here is a thread serving a Unix socket, so the example runs
//! without QEMU. Cube A greets cube B through the relay, B answers, then
//! both are asked to shut down.
//!
//! ```bash
//! cargo run -p cubelink --example cube-pair
//! ```

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::net::UnixListener;
    use std::thread;

    use cubelink::frame::FrameTransport;
    use cubelink::sim::{select_on, CubeProcess, SimMessage};
    use serde_json::json;

    let dir = std::env::temp_dir().join(format!("cube-pair-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;

    type CubeThread = thread::JoinHandle<cubelink::frame::Result<()>>;
    let fake_cube = |name: &'static str,
                     opener: Option<serde_json::Value>|
     -> std::io::Result<(std::path::PathBuf, CubeThread)> {
        let path = dir.join(name);
        let listener = UnixListener::bind(&path)?;
        let handle = thread::spawn(move || -> cubelink::frame::Result<()> {
            let (stream, _) = listener.accept()?;
            let mut cube = FrameTransport::new(stream)?;
            if let Some(opener) = opener {
                cube.write_message_as(&opener)?;
            }
            loop {
                let message: serde_json::Value = cube.read_message_as()?;
                if serde_json::from_value::<SimMessage>(message.clone())
                    .is_ok_and(|m| m.is_shutdown())
                {
                    println!("[{name}] shutting down");
                    return Ok(());
                }
                println!("[{name}] got {message}");
                if message.get("hello").is_some() {
                    cube.write_message_as(&json!({"reply": format!("hi from {name}")}))?;
                }
            }
        });
        Ok((path, handle))
    };

    let (path_a, cube_a) = fake_cube("cube-a", Some(json!({"hello": "from cube-a"})))?;
    let (path_b, cube_b) = fake_cube("cube-b", None)?;

    let mut cubes = [CubeProcess::attach(&path_a)?, CubeProcess::attach(&path_b)?];

    let mut relayed = 0;
    while relayed < 2 {
        let labels: Vec<String> = select_on(cubes.iter_mut())?
            .iter()
            .map(|cube| cube.label())
            .collect();
        let ready: Vec<usize> = cubes
            .iter()
            .enumerate()
            .filter(|(_, cube)| labels.contains(&cube.label()))
            .map(|(index, _)| index)
            .collect();

        for index in ready {
            let payload = cubes[index].receive_bytes()?;
            let peer = 1 - index;
            println!("relay {} -> {}", cubes[index].label(), cubes[peer].label());
            cubes[peer].send_bytes(&payload)?;
            relayed += 1;
        }
    }

    for cube in &mut cubes {
        cube.stop()?;
    }
    for handle in [cube_a, cube_b] {
        if let Ok(Err(err)) = handle.join() {
            eprintln!("cube thread failed: {err}");
        }
    }

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("cube-pair requires a Unix host");
}
