//! 查看器页面
//!
//! 页面加载一个 `<img>`，循环请求 `/frame`：200 时把 base64 正文设为
//! `data:image/jpeg;base64,...`，204 或失败视为暂无画面。无论结果如何，
//! 都在固定延迟后再发起下一次请求，慢响应会自然降低轮询频率。

/// 生成查看器 HTML 页面
pub fn viewer_html(poll_interval_ms: u64) -> String {
    format!(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Screen Share</title>
    <style>
        body {{
            margin: 0;
            padding: 20px;
            background: #000;
            font-family: Arial, sans-serif;
        }}
        h1 {{
            color: white;
            text-align: center;
        }}
        #screen {{
            max-width: 100%;
            height: auto;
            border: 2px solid #333;
            display: block;
            margin: 0 auto;
        }}
        #status {{
            color: white;
            text-align: center;
            margin: 10px 0;
        }}
    </style>
</head>
<body>
    <h1>Screen Mirror</h1>
    <div id="status">Connecting...</div>
    <img id="screen" src="" alt="Mirrored Screen">

    <script>
        const POLL_INTERVAL_MS = {poll_interval_ms};

        const img = document.getElementById('screen');
        const status = document.getElementById('status');
        let isConnected = false;

        function setConnected(connected) {{
            if (connected === isConnected) return;
            isConnected = connected;
            status.textContent = connected ? 'Connected - Live Screen' : 'Waiting for screen data...';
        }}

        // 自调度轮询：上一次请求结束后才安排下一次
        function updateFrame() {{
            fetch('/frame', {{ cache: 'no-store' }})
                .then(response => {{
                    if (response.status === 200) {{
                        return response.text();
                    }}
                    throw new Error('No frame available');
                }})
                .then(base64 => {{
                    img.src = 'data:image/jpeg;base64,' + base64;
                    setConnected(true);
                }})
                .catch(() => {{
                    setConnected(false);
                }})
                .finally(() => {{
                    setTimeout(updateFrame, POLL_INTERVAL_MS);
                }});
        }}

        updateFrame();
    </script>
</body>
</html>"#, poll_interval_ms = poll_interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_contains_polling_client() {
        let html = viewer_html(100);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<img id=\"screen\""));
        assert!(html.contains("fetch('/frame'"));
        assert!(html.contains("data:image/jpeg;base64,"));
        assert!(html.contains("const POLL_INTERVAL_MS = 100;"));
        assert!(html.contains("setTimeout(updateFrame, POLL_INTERVAL_MS)"));
        assert!(!html.contains("setInterval"));
    }

    #[test]
    fn test_poll_interval_is_configurable() {
        assert!(viewer_html(250).contains("const POLL_INTERVAL_MS = 250;"));
    }
}
