pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Rover Controller</title>
  <style>
    body { font-family: system-ui, sans-serif; background: #0b1320; color: #e2e8f0; margin: 2rem; }
    code { background: #1e293b; padding: 0.1rem 0.3rem; border-radius: 4px; }
    img { max-width: 100%; border: 1px solid #334155; margin-top: 1rem; }
    li { margin: 0.4rem 0; }
  </style>
</head>
<body>
  <h1>Rover controller</h1>
  <p>The rover is online. Drive it and read crop telemetry through the endpoints below.</p>
  <ul>
    <li><code>POST /command</code> with <code>{"command": "Moving Forward"}</code>
      (also <code>Moving Backward</code>, <code>Turning Left</code>, <code>Turning Right</code>,
      <code>Lowering Sensor</code>; anything else stops the drive)</li>
    <li><code>GET /video_feed</code> live MJPEG with the detected crop and last command burned in</li>
    <li><code>GET /crop_data</code> latest crop with its humidity and soil moisture ranges</li>
    <li><code>GET /metrics</code> Prometheus metrics</li>
  </ul>
  <img src="/video_feed" alt="live rover camera" />
</body>
</html>
"#;
