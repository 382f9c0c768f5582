use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use sitefetch_rs::{
    AnswerPrompt,
    CaptchaResolver,
    CookieFileStore,
    EntityKind,
    FetchOutcome,
    FetchRequest,
    Fetcher,
    FetcherConfig,
    FlareSolverrResolver,
    PromptRequest,
    RelatedUrlKey,
    ResolverSet,
    ResponseCache,
    TwoCaptchaProvider,
    VERSION,
};
use tokio::runtime::Runtime;
use url::Url;

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_bool(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

fn parse_f64(input: &str, default: f64) -> f64 {
    input.trim().parse().ok().filter(|value: &f64| *value >= 0.0).unwrap_or(default)
}

struct StdinPrompt;

#[async_trait]
impl AnswerPrompt for StdinPrompt {
    async fn ask(&self, request: &PromptRequest) -> Option<String> {
        println!(
            "\n{} (attempt {}/{})\nOpen {} and solve the captcha for site key {}.",
            request.heading, request.attempt, request.max_attempts, request.page_url, request.site_key
        );
        let answer = prompt("Captcha response token (blank to give up):").ok()?;
        (!answer.is_empty()).then_some(answer)
    }
}

#[test]
#[ignore = "Requires network access and manual input"]
fn interactive_full_stack() -> Result<(), Box<dyn Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    println!("sitefetch-rs {} interactive smoke test", VERSION);
    println!("Provide inputs when prompted. Press Enter to accept defaults.\n");

    let url_input = prompt("Target URL [https://example.com]:")?;
    let target_url = if url_input.is_empty() {
        "https://example.com".to_string()
    } else {
        url_input
    };
    let parsed = Url::parse(&target_url)?;
    let base_url = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or("example.com"));

    let interactive_answer = prompt("Handle captcha walls? (y/N):")?;
    let flaresolverr_answer = prompt("FlareSolverr endpoint (blank for none):")?;
    let twocaptcha_answer = prompt("2captcha API key (blank to answer by hand):")?;
    let ttl_answer = prompt("Cache TTL in hours [8]:")?;

    let mut resolvers = ResolverSet::new();
    if !flaresolverr_answer.is_empty() {
        resolvers.push(Arc::new(FlareSolverrResolver::new(Url::parse(&flaresolverr_answer)?)));
    }
    let mut captcha = CaptchaResolver::new().with_prompt(Arc::new(StdinPrompt));
    if !twocaptcha_answer.is_empty() {
        captcha = captcha.with_provider(Arc::new(TwoCaptchaProvider::new(twocaptcha_answer)));
    }
    resolvers.push(Arc::new(captcha));

    let config = FetcherConfig {
        interactive_challenges: parse_bool(&interactive_answer, false),
        cookie_debug: true,
        ..FetcherConfig::default()
    };

    let workdir = tempfile::tempdir()?;
    let cache = ResponseCache::open(workdir.path().join("cache.redb"))?;
    let fetcher = Fetcher::builder("interactive", base_url)
        .with_config(config)
        .with_cache(cache.clone())
        .with_cookie_store(CookieFileStore::new(workdir.path().join("cookies"))?)
        .with_resolvers(resolvers)
        .build()?;
    let runtime = Runtime::new()?;

    println!("\nFetching {}...", target_url);
    let request = FetchRequest::new(&target_url).cache_ttl_hours(parse_f64(&ttl_answer, 8.0));
    let outcome = runtime.block_on(fetcher.fetch(request))?;
    describe(&outcome);

    println!("Fetching again (expect a cache hit)...");
    let again = runtime.block_on(fetcher.get(&target_url))?;
    println!("Served from cache: {}", matches!(again, FetchOutcome::Cached { .. }));
    println!("Cookies stored: {:?}", fetcher.cookie_map()?);

    let related = cache.related_urls();
    let key = RelatedUrlKey::new(EntityKind::Movie, "Example", Some(2020), "interactive");
    let resolved = runtime.block_on(related.resolve_with(&key, || async { None }))?;
    println!("Related-url miss cached as sentinel: {:?} -> {:?}", resolved, related.get(&key)?);

    println!("Interactive test complete. Re-run with different inputs as needed.");
    Ok(())
}

fn describe(outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Page(page)
        | FetchOutcome::Cached { page, .. }
        | FetchOutcome::Resolved { page, .. } => {
            println!("Status: {}", page.status);
            println!("Final URL: {}", page.url);
            println!("Headers received: {}", page.headers.len());
            let snippet: String = page.text().chars().take(400).collect();
            println!("Body preview (first 400 chars):\n{}\n", snippet);
        }
        FetchOutcome::Redirect(location) => println!("Redirected to {location}"),
        FetchOutcome::Blocked(reason) => println!("Blocked: {reason}"),
        FetchOutcome::Failed(reason) => println!("Failed: {reason}"),
    }
}
