use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://localhost:5000")]
    base_url: String,

    #[arg(long, default_value = "tester@example.com")]
    email: String,
}

struct Session {
    client: Client,
    base_url: String,
}

impl Session {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let mut request = self.client.request(method.clone(), &url);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {path} failed to send"))?;
        let status = response.status();
        let body = response
            .json()
            .await
            .with_context(|| format!("{method} {path} returned a non-JSON body"))?;

        println!("{method} {path} -> {status}");

        Ok((status, body))
    }

    async fn check(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Result<Value> {
        let (status, body) = self.call(method.clone(), path, body).await?;
        ensure!(
            status == expected,
            "{method} {path}: expected {expected}, got {status} with {body}"
        );

        Ok(body)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let session = Session {
        client: Client::builder().cookie_store(true).build()?,
        base_url: args.base_url,
    };

    let health = session
        .check(Method::GET, "/api/health", None, StatusCode::OK)
        .await?;
    ensure!(health["database"] == "up", "database is down: {health}");

    let login = session
        .check(
            Method::POST,
            "/api/auth/login",
            Some(json!({ "username": "Smoke Tester", "email": args.email })),
            StatusCode::OK,
        )
        .await?;
    println!("Logged in as {}", login["user"]["username"]);

    let categories = session
        .check(Method::GET, "/api/categories", None, StatusCode::OK)
        .await?;
    let Some(category) = categories.as_array().and_then(|list| list.first()) else {
        bail!("no categories seeded");
    };
    let category_name = category["name"].as_str().context("category without name")?;

    let created = session
        .check(
            Method::POST,
            "/api/forum/posts",
            Some(json!({
                "title": "Smoke test post",
                "content": "Checking the forum end to end.",
                "categoryId": category["id"],
            })),
            StatusCode::CREATED,
        )
        .await?;
    let post_id = created["postId"].as_i64().context("missing postId")?;

    let listed_path = format!(
        "/api/forum/posts?category={}&limit=100",
        category_name.replace(' ', "%20")
    );
    let listed = session
        .check(
            Method::GET,
            &listed_path,
            None,
            StatusCode::OK,
        )
        .await?;
    let listed_post = listed["posts"]
        .as_array()
        .and_then(|posts| posts.iter().find(|post| post["id"] == post_id))
        .context("new post missing from its category listing")?;
    ensure!(listed_post["reply_count"] == 0, "fresh post has replies");

    let detail = session
        .check(Method::GET, &format!("/api/forum/posts/{post_id}"), None, StatusCode::OK)
        .await?;
    ensure!(detail["post"]["views"] == 1, "view not counted: {detail}");

    let reply = session
        .check(
            Method::POST,
            &format!("/api/forum/posts/{post_id}/replies"),
            Some(json!({ "content": "Replying to myself." })),
            StatusCode::CREATED,
        )
        .await?;
    let reply_id = reply["replyId"].as_i64().context("missing replyId")?;

    let helpful = format!("/api/forum/replies/{reply_id}/helpful");
    let added = session
        .check(Method::POST, &helpful, None, StatusCode::OK)
        .await?;
    ensure!(
        added["action"] == "added" && added["helpful_count"] == 1,
        "unexpected first toggle: {added}"
    );

    let removed = session
        .check(Method::POST, &helpful, None, StatusCode::OK)
        .await?;
    ensure!(
        removed["action"] == "removed" && removed["helpful_count"] == 0,
        "unexpected second toggle: {removed}"
    );

    session
        .check(
            Method::POST,
            "/api/progress",
            Some(json!({ "courseId": "smoke-101", "completed": true })),
            StatusCode::OK,
        )
        .await?;
    let progress = session
        .check(Method::GET, "/api/progress", None, StatusCode::OK)
        .await?;
    let completed = progress["progress"].as_array().is_some_and(|records| {
        records
            .iter()
            .any(|record| record["course_id"] == "smoke-101" && record["completed"] == true)
    });
    ensure!(completed, "progress not stored: {progress}");

    session
        .check(Method::POST, "/api/auth/logout", None, StatusCode::OK)
        .await?;
    let me = session
        .check(Method::GET, "/api/auth/me", None, StatusCode::OK)
        .await?;
    ensure!(me["authenticated"] == false, "still authenticated after logout");

    println!("All checks passed");

    Ok(())
}
