//! Device diagnostics page.
//!
//! A self-contained HTML page that checks camera/microphone access and
//! exercises the diagnostic-token and TURN-credential endpoints, so users
//! can verify their setup before a call.

use axum::response::Html;

pub async fn page() -> Html<&'static str> {
    Html(DEVICE_CHECK_HTML)
}

const DEVICE_CHECK_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Device Diagnostics</title>
  <style>
    body {
      font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
      background: #0f172a; color: #f8fafc; margin: 0; padding: 1rem; line-height: 1.5;
    }
    .container { max-width: 720px; margin: 0 auto; }
    h1 { color: #38bdf8; text-align: center; }
    .card {
      background: #1e293b; border-radius: 0.75rem; padding: 1.25rem; margin-bottom: 1.25rem;
    }
    .card h2 { margin-top: 0; font-size: 1.1rem; border-bottom: 1px solid #334155; padding-bottom: 0.5rem; }
    .item { display: flex; justify-content: space-between; padding: 0.4rem 0; word-break: break-all; }
    .label { color: #94a3b8; margin-right: 1rem; }
    .value { font-family: monospace; text-align: right; }
    .ok { color: #22c55e; }
    .fail { color: #ef4444; }
    .pending { color: #f59e0b; }
  </style>
</head>
<body>
<div class="container">
  <h1>Device Diagnostics</h1>
  <div class="card">
    <h2>Media devices</h2>
    <div class="item"><span class="label">Camera</span><span class="value pending" id="camera">checking...</span></div>
    <div class="item"><span class="label">Microphone</span><span class="value pending" id="microphone">checking...</span></div>
  </div>
  <div class="card">
    <h2>Relay connectivity</h2>
    <div class="item"><span class="label">Diagnostic token</span><span class="value pending" id="token">checking...</span></div>
    <div class="item"><span class="label">TURN credentials</span><span class="value pending" id="turn">checking...</span></div>
    <div class="item"><span class="label">Relay candidate</span><span class="value pending" id="relay">checking...</span></div>
  </div>
</div>
<script>
  const set = (id, text, cls) => {
    const el = document.getElementById(id);
    el.textContent = text;
    el.className = 'value ' + cls;
  };

  async function checkMedia() {
    try {
      const stream = await navigator.mediaDevices.getUserMedia({ video: true, audio: true });
      const video = stream.getVideoTracks().length > 0;
      const audio = stream.getAudioTracks().length > 0;
      set('camera', video ? 'available' : 'not found', video ? 'ok' : 'fail');
      set('microphone', audio ? 'available' : 'not found', audio ? 'ok' : 'fail');
      stream.getTracks().forEach((track) => track.stop());
    } catch (err) {
      set('camera', 'denied: ' + err.name, 'fail');
      set('microphone', 'denied: ' + err.name, 'fail');
    }
  }

  async function checkRelay() {
    let creds;
    try {
      const tokenResp = await fetch('/api/diagnostic-token', { method: 'POST' });
      if (!tokenResp.ok) throw new Error('HTTP ' + tokenResp.status);
      const { token } = await tokenResp.json();
      set('token', 'issued', 'ok');

      const credsResp = await fetch('/api/turn-credentials', {
        method: 'POST',
        headers: { 'X-Turn-Token': token },
      });
      if (!credsResp.ok) throw new Error('HTTP ' + credsResp.status);
      creds = await credsResp.json();
      set('turn', creds.uris.length + ' uris', 'ok');
    } catch (err) {
      set('token', String(err.message || err), 'fail');
      set('turn', 'skipped', 'fail');
      set('relay', 'skipped', 'fail');
      return;
    }

    try {
      const pc = new RTCPeerConnection({
        iceServers: [{ urls: creds.uris, username: creds.username, credential: creds.password }],
        iceTransportPolicy: 'relay',
      });
      pc.createDataChannel('probe');
      const sawRelay = new Promise((resolve) => {
        pc.onicecandidate = (e) => {
          if (e.candidate && e.candidate.type === 'relay') resolve(true);
          if (!e.candidate) resolve(false);
        };
        setTimeout(() => resolve(false), 8000);
      });
      await pc.setLocalDescription(await pc.createOffer());
      const ok = await sawRelay;
      pc.close();
      set('relay', ok ? 'gathered' : 'no relay candidate', ok ? 'ok' : 'fail');
    } catch (err) {
      set('relay', String(err.message || err), 'fail');
    }
  }

  checkMedia();
  checkRelay();
</script>
</body>
</html>
"#;
