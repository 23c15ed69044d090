// Page socket route guard.

use actix_web::{test, web, App};

use common::Config;
use relay_server::routing::routes;

#[actix_web::test]
async fn page_socket_requires_a_declared_origin() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Config::default()))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/ws/page").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
