//! Route registration with per-route middleware stacks.
//!
//! A [`Router`] collects warp filters. The middleware active at the moment a
//! route is registered is baked into that route, and nested routers start out
//! with a copy of their parent's stack. The collected routes are finally
//! combined into a single [`Route`] via [`Router::into_route`].

use async_trait::async_trait;
use std::sync::Arc;
use warp::filters::BoxedFilter;
use warp::http::{HeaderName, HeaderValue};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// A boxed warp filter producing a complete response.
pub type Route = BoxedFilter<(Response,)>;

/// Transforms a route, e.g. by inspecting the request or decorating the response.
pub type Middleware = Arc<dyn Fn(Route) -> Route + Send + Sync>;

/// Wraps a closure as [`Middleware`].
pub fn middleware<F>(transform: F) -> Middleware
where
    F: Fn(Route) -> Route + Send + Sync + 'static,
{
    Arc::new(transform)
}

/// Collapses a list of middleware into one where the first entry is the outermost.
pub fn compose(middleware: &[Middleware]) -> Middleware {
    let middleware = middleware.to_vec();
    Arc::new(move |route| apply(&middleware, route))
}

fn apply(middleware: &[Middleware], route: Route) -> Route {
    middleware.iter().rev().fold(route, |route, mw| mw(route))
}

/// Appends the given header to every response.
pub fn response_header(name: HeaderName, value: HeaderValue) -> Middleware {
    middleware(move |route| {
        let name = name.clone();
        let value = value.clone();
        route
            .map(move |mut response: Response| {
                response.headers_mut().append(name.clone(), value.clone());
                response
            })
            .boxed()
    })
}

/// Collects routes and the middleware that applies to them.
#[derive(Clone, Default)]
pub struct Router {
    middleware: Vec<Middleware>,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    /// Adds middleware for all routes registered afterwards.
    pub fn with(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Registers the routes created by `f` on a router which inherits the current
    /// middleware. Middleware added within `f` does not leak out of the group.
    pub fn group(mut self, f: impl FnOnce(Router) -> Router) -> Self {
        let child = f(self.child());
        self.routes.extend(child.routes);
        self
    }

    /// Like [`Router::group`], but all routes are nested below `prefix`.
    pub fn route(mut self, prefix: &str, f: impl FnOnce(Router) -> Router) -> Self {
        let child = f(self.child());
        if let Some(nested) = combine(child.routes) {
            self.routes.push(under_prefix(prefix, nested));
        }
        self
    }

    pub fn get<F, R>(self, filter: F) -> Self
    where
        F: Filter<Extract = (R,), Error = Rejection> + Clone + Send + Sync + 'static,
        R: Reply + 'static,
    {
        self.method(warp::get(), filter)
    }

    pub fn post<F, R>(self, filter: F) -> Self
    where
        F: Filter<Extract = (R,), Error = Rejection> + Clone + Send + Sync + 'static,
        R: Reply + 'static,
    {
        self.method(warp::post(), filter)
    }

    pub fn put<F, R>(self, filter: F) -> Self
    where
        F: Filter<Extract = (R,), Error = Rejection> + Clone + Send + Sync + 'static,
        R: Reply + 'static,
    {
        self.method(warp::put(), filter)
    }

    pub fn delete<F, R>(self, filter: F) -> Self
    where
        F: Filter<Extract = (R,), Error = Rejection> + Clone + Send + Sync + 'static,
        R: Reply + 'static,
    {
        self.method(warp::delete(), filter)
    }

    /// Attaches a filter for any method below `prefix`, e.g. another API or static files.
    pub fn mount<F, R>(mut self, prefix: &str, filter: F) -> Self
    where
        F: Filter<Extract = (R,), Error = Rejection> + Clone + Send + Sync + 'static,
        R: Reply + 'static,
    {
        let route = filter.map(|reply: R| reply.into_response()).boxed();
        let route = apply(&self.middleware, route);
        self.routes.push(under_prefix(prefix, route));
        self
    }

    /// Combines all registered routes. An empty router rejects every request.
    pub fn into_route(self) -> Route {
        combine(self.routes).unwrap_or_else(|| {
            warp::any()
                .and_then(|| async { Err::<Response, Rejection>(warp::reject::not_found()) })
                .boxed()
        })
    }

    fn method<M, F, R>(mut self, method: M, filter: F) -> Self
    where
        M: Filter<Extract = (), Error = Rejection> + Clone + Send + Sync + 'static,
        F: Filter<Extract = (R,), Error = Rejection> + Clone + Send + Sync + 'static,
        R: Reply + 'static,
    {
        let route = method
            .and(filter)
            .map(|reply: R| reply.into_response())
            .boxed();
        let route = apply(&self.middleware, route);
        self.routes.push(route);
        self
    }

    fn child(&self) -> Router {
        Router {
            middleware: self.middleware.clone(),
            routes: Vec::new(),
        }
    }
}

fn combine(routes: Vec<Route>) -> Option<Route> {
    routes
        .into_iter()
        .reduce(|combined, route| combined.or(route).unify().boxed())
}

fn under_prefix(prefix: &str, route: Route) -> Route {
    prefix
        .split('/')
        .filter(|segment| !segment.is_empty())
        .rev()
        .fold(route, |route, segment| {
            warp::path(segment.to_string()).and(route).boxed()
        })
}

/// A named group of routes which can report its own health.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn healthy(&self) -> anyhow::Result<()>;

    /// Registers the module's routes.
    fn routes(&self, router: Router) -> Router;
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::StatusCode;

    fn tag(value: &'static str) -> Middleware {
        response_header(HeaderName::from_static("x-tag"), HeaderValue::from_static(value))
    }

    fn tags(response: &warp::http::Response<bytes::Bytes>) -> Vec<String> {
        response
            .headers()
            .get_all("x-tag")
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn routes_match_method_and_path() {
        let route = Router::new()
            .get(warp::path!("users").map(|| "list"))
            .post(warp::path!("users").map(|| "create"))
            .into_route();

        let response = warp::test::request().path("/users").reply(&route).await;
        assert_eq!(response.body(), "list");

        let response = warp::test::request()
            .method("POST")
            .path("/users")
            .reply(&route)
            .await;
        assert_eq!(response.body(), "create");
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let route = Router::new()
            .with(compose(&[tag("A"), tag("B")]))
            .with(tag("C"))
            .get(warp::path!("ping").map(|| "pong"))
            .into_route();

        let response = warp::test::request().path("/ping").reply(&route).await;

        assert_eq!(tags(&response), vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn middleware_is_captured_at_registration() {
        let route = Router::new()
            .get(warp::path!("before").map(|| "before"))
            .with(tag("late"))
            .get(warp::path!("after").map(|| "after"))
            .into_route();

        let response = warp::test::request().path("/before").reply(&route).await;
        assert!(tags(&response).is_empty());

        let response = warp::test::request().path("/after").reply(&route).await;
        assert_eq!(tags(&response), vec!["late"]);
    }

    #[tokio::test]
    async fn nested_routes_inherit_parent_middleware_without_leaking() {
        let route = Router::new()
            .with(tag("root"))
            .route("/api/v1", |api| {
                api.with(tag("api"))
                    .get(warp::path!("items").map(|| "items"))
            })
            .group(|group| group.get(warp::path!("plain").map(|| "plain")))
            .into_route();

        let response = warp::test::request().path("/api/v1/items").reply(&route).await;
        assert_eq!(response.body(), "items");
        assert_eq!(tags(&response), vec!["api", "root"]);

        let response = warp::test::request().path("/plain").reply(&route).await;
        assert_eq!(tags(&response), vec!["root"]);
    }

    #[tokio::test]
    async fn mount_accepts_any_method_below_prefix() {
        let route = Router::new()
            .mount("/static", warp::path::tail().and_then(|tail: warp::path::Tail| async move { Ok::<_, Rejection>(tail.as_str().to_string()) }))
            .into_route();

        let response = warp::test::request()
            .method("PUT")
            .path("/static/css/site.css")
            .reply(&route)
            .await;

        assert_eq!(response.body(), "css/site.css");
    }

    #[tokio::test]
    async fn unknown_routes_are_rejected() {
        let route = Router::new()
            .get(warp::path!("known").map(|| "ok"))
            .into_route();

        let rejection = warp::test::request().path("/unknown").filter(&route).await.unwrap_err();
        assert!(rejection.is_not_found());

        let empty = Router::new().into_route();
        let rejection = warp::test::request().path("/").filter(&empty).await.unwrap_err();
        assert!(rejection.is_not_found());
    }

    #[tokio::test]
    async fn wrong_method_is_rejected_as_not_allowed() {
        let route = Router::new()
            .get(warp::path!("only-get").map(|| "ok"))
            .into_route()
            .recover(crate::web::respond::handle_rejection);

        let response = warp::test::request()
            .method("DELETE")
            .path("/only-get")
            .reply(&route)
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
